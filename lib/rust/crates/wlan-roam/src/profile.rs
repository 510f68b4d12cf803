// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::{Bssid, ChannelNumber, MacAddr, Ssid};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthType {
    Open,
    Wpa2Psk,
    Wpa3Sae,
    Wpa2Enterprise,
    Wapi,
}

impl AuthType {
    /// Whether keys must be installed before the link carries data.
    pub fn requires_keys(&self) -> bool {
        *self != AuthType::Open
    }
}

/// What the upper layer asked to connect to.
#[derive(Clone, Debug, PartialEq)]
pub struct RoamProfile {
    pub ssid: Ssid,
    /// Restricts candidates to a single BSS when set.
    pub bssid: Option<Bssid>,
    pub auth_type: AuthType,
    pub rates: Vec<u8>,
    /// Extra IEs for the association request.
    pub assoc_ies: Vec<u8>,
}

impl RoamProfile {
    pub fn new(ssid: Ssid, auth_type: AuthType) -> Self {
        RoamProfile { ssid, bssid: None, auth_type, rates: vec![], assoc_ies: vec![] }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    Pairwise,
    Group,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyDescriptor {
    pub key_type: KeyType,
    pub key_id: u8,
    /// Peer address, broadcast for group keys.
    pub address: MacAddr,
    pub key: Vec<u8>,
    pub rsc: [u8; 8],
}

/// Key material handed over by firmware after a host-independent roam.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionKeys {
    pub kck: Vec<u8>,
    pub kek: Vec<u8>,
}

/// Snapshot of the link a session is (or is becoming) joined to.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectedProfile {
    pub ssid: Ssid,
    pub bssid: Bssid,
    pub auth_type: AuthType,
    pub rates: Vec<u8>,
    pub channel: ChannelNumber,
    pub keys: Option<SessionKeys>,
    pub replay_counter: Option<[u8; 8]>,
    pub pmk: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test_case(AuthType::Open => false ; "open")]
    #[test_case(AuthType::Wpa2Psk => true ; "wpa2 psk")]
    #[test_case(AuthType::Wpa3Sae => true ; "wpa3 sae")]
    #[test_case(AuthType::Wapi => true ; "wapi")]
    fn requires_keys(auth_type: AuthType) -> bool {
        auth_type.requires_keys()
    }
}
