// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Station connection/roaming state machine with per-vdev command serialization.
//!
//! A [`RoamStateMachine`] tracks, for every virtual device (vdev), a coarse connection state
//! and a fine-grained substate, and serializes the commands it issues to firmware so that at
//! most one command per vdev is in flight at any time. Firmware requests leave through an
//! unbounded [`FwStream`]; firmware answers come back through
//! [`RoamStateMachine::on_command_result`].

pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod power;
pub mod profile;
pub mod queue;
pub mod roam;
pub mod session;
pub mod sink;
pub mod timer;

#[cfg(test)]
mod test_utils;

use futures::channel::mpsc;

pub use crate::command::{RoamId, TxnId};
pub use crate::config::RoamConfig;
pub use crate::error::Error;
pub use crate::profile::{AuthType, ConnectedProfile, KeyDescriptor, KeyType, RoamProfile};
pub use crate::roam::{
    AuthStatus, ConnectRequest, ConnectResult, Diagnostics, DisconnectCause, DisconnectReason,
    InfoEvent, LinkLossKind, RoamStateMachine, RoamSyncParams, Status, TrafficClass,
};
pub use crate::session::SessionHandle;

pub type MacAddr = [u8; 6];
pub type Bssid = MacAddr;
pub type Ssid = Vec<u8>;
pub type VdevId = u8;
pub type ChannelNumber = u8;
pub type CountryCode = [u8; 2];
pub type Pmkid = [u8; 16];

/// Maximum number of concurrently open sessions (one per vdev) on a radio.
pub const MAX_SESSIONS: usize = 5;

pub const BROADCAST_ADDR: MacAddr = [0xff; 6];

pub trait MacFmt {
    fn to_mac_str(&self) -> String;
}

impl MacFmt for MacAddr {
    fn to_mac_str(&self) -> String {
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self[0], self[1], self[2], self[3], self[4], self[5]
        )
    }
}

/// A BSS as reported by a scan, in scan order.
#[derive(Clone, Debug, PartialEq)]
pub struct BssDescription {
    pub bssid: Bssid,
    pub ssid: Ssid,
    pub channel: ChannelNumber,
    pub is_dfs: bool,
    pub rssi_dbm: i8,
    /// Country code advertised in the 802.11d IE, if any.
    pub country: Option<CountryCode>,
    pub beacon_period: u16,
}

impl BssDescription {
    pub fn is_5ghz(&self) -> bool {
        !channel::is_channel_24ghz(self.channel)
    }
}

/// A request to firmware. Every request carries the transaction id that the matching
/// `on_command_result` call must echo back.
#[derive(Clone, Debug, PartialEq)]
pub enum FwRequest {
    Scan {
        txn_id: TxnId,
        vdev_id: VdevId,
        ssid: Option<Ssid>,
        channels: Vec<ChannelNumber>,
        country: CountryCode,
    },
    Join {
        txn_id: TxnId,
        vdev_id: VdevId,
        bss: BssDescription,
        country: CountryCode,
    },
    Authenticate {
        txn_id: TxnId,
        vdev_id: VdevId,
        bssid: Bssid,
        auth_type: AuthType,
        pmkid: Option<Pmkid>,
    },
    ConfigureBss {
        txn_id: TxnId,
        vdev_id: VdevId,
        bssid: Bssid,
        rates: Vec<u8>,
        tx_power: Option<u8>,
    },
    Reassociate {
        txn_id: TxnId,
        vdev_id: VdevId,
        bss: BssDescription,
        pmkid: Option<Pmkid>,
    },
    SetKey {
        txn_id: TxnId,
        vdev_id: VdevId,
        key: KeyDescriptor,
    },
    Disassociate {
        txn_id: TxnId,
        vdev_id: VdevId,
        bssid: Bssid,
        reason_code: u16,
    },
    Deauthenticate {
        txn_id: TxnId,
        vdev_id: VdevId,
        bssid: Bssid,
        reason_code: u16,
    },
    StartBss {
        txn_id: TxnId,
        vdev_id: VdevId,
        ssid: Ssid,
        channel: ChannelNumber,
    },
    StopBss {
        txn_id: TxnId,
        vdev_id: VdevId,
    },
    DeleteStation {
        txn_id: TxnId,
        vdev_id: VdevId,
        self_addr: MacAddr,
    },
}

impl FwRequest {
    pub fn txn_id(&self) -> TxnId {
        match self {
            FwRequest::Scan { txn_id, .. }
            | FwRequest::Join { txn_id, .. }
            | FwRequest::Authenticate { txn_id, .. }
            | FwRequest::ConfigureBss { txn_id, .. }
            | FwRequest::Reassociate { txn_id, .. }
            | FwRequest::SetKey { txn_id, .. }
            | FwRequest::Disassociate { txn_id, .. }
            | FwRequest::Deauthenticate { txn_id, .. }
            | FwRequest::StartBss { txn_id, .. }
            | FwRequest::StopBss { txn_id, .. }
            | FwRequest::DeleteStation { txn_id, .. } => *txn_id,
        }
    }

    pub fn vdev_id(&self) -> VdevId {
        match self {
            FwRequest::Scan { vdev_id, .. }
            | FwRequest::Join { vdev_id, .. }
            | FwRequest::Authenticate { vdev_id, .. }
            | FwRequest::ConfigureBss { vdev_id, .. }
            | FwRequest::Reassociate { vdev_id, .. }
            | FwRequest::SetKey { vdev_id, .. }
            | FwRequest::Disassociate { vdev_id, .. }
            | FwRequest::Deauthenticate { vdev_id, .. }
            | FwRequest::StartBss { vdev_id, .. }
            | FwRequest::StopBss { vdev_id, .. }
            | FwRequest::DeleteStation { vdev_id, .. } => *vdev_id,
        }
    }
}

/// Status carried by a firmware completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FwStatus {
    Success,
    Failure { status_code: u16, reason_code: u16 },
}

impl FwStatus {
    pub fn is_success(&self) -> bool {
        *self == FwStatus::Success
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FwPayload {
    None,
    ScanResults(Vec<BssDescription>),
}

pub type FwStream = mpsc::UnboundedReceiver<FwRequest>;
pub type InfoStream = mpsc::UnboundedReceiver<InfoEvent>;
