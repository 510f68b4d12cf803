// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    super::{DisconnectCause, InfoEvent, RoamStateMachine},
    crate::{
        error::Error,
        power::OffloadTrigger,
        profile::{AuthType, ConnectedProfile, SessionKeys},
        queue::PurgeScope,
        roam::state::{State, Substate},
        session::{RoamingReason, SessionHandle},
        BssDescription, MacFmt, Pmkid,
    },
    log::{info, warn},
};

/// Link state reported by firmware after it roamed on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    /// Associated; the key handshake still has to run on the host.
    Connected,
    /// Associated and keyed by firmware.
    Authenticated,
    Unknown,
}

impl AuthStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => AuthStatus::Connected,
            2 => AuthStatus::Authenticated,
            _ => AuthStatus::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoamSyncParams {
    pub bss: BssDescription,
    pub auth_status: AuthStatus,
    /// Firmware's own roam trigger, logged only.
    pub roam_reason: u8,
    pub kck: Vec<u8>,
    pub kek: Vec<u8>,
    pub replay_counter: [u8; 8],
    pub pmk: Option<Vec<u8>>,
    pub pmkid: Option<Pmkid>,
}

impl RoamStateMachine {
    /// Adopts a roam firmware already completed. Local roam work for the vdev is superseded and
    /// the substate is set without consulting the transition table.
    pub fn indicate_roam_offload_sync(
        &self,
        handle: SessionHandle,
        params: RoamSyncParams,
    ) -> Result<(), Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        let vdev_id = handle.vdev_id();
        let bssid = params.bss.bssid;
        info!(
            "vdev {}: firmware roamed to {} ({:?}, trigger {})",
            vdev_id,
            bssid.to_mac_str(),
            params.auth_status,
            params.roam_reason
        );

        let previous = self.with_session(handle, |s| {
            s.roam_sync_in_progress = true;
            let auth_type = s
                .connected_profile
                .as_ref()
                .map(|p| p.auth_type)
                .or_else(|| s.stored_profile.as_ref().map(|stored| stored.profile.auth_type));
            let rates = s.connected_profile.as_ref().map(|p| p.rates.clone());
            (auth_type, rates)
        })?;
        let purged = self.queue.purge_for_vdev(vdev_id, PurgeScope::ConnectAttempts);
        let auth_type = previous
            .0
            .or_else(|| purged.iter().find_map(|cmd| cmd.roam_profile().map(|p| p.auth_type)))
            .unwrap_or(AuthType::Open);
        self.cancel_purged(purged);
        self.cancel_roaming_timer(handle);

        let pause = self
            .with_session(handle, |s| !std::mem::replace(&mut s.offloads_paused, true))
            .unwrap_or(false);
        if pause {
            self.power.pause_traffic_dependent_offloads(vdev_id, OffloadTrigger::RoamSync);
        }

        match params.auth_status {
            AuthStatus::Authenticated | AuthStatus::Connected => {
                let authenticated = params.auth_status == AuthStatus::Authenticated;
                let connected = ConnectedProfile {
                    ssid: params.bss.ssid.clone(),
                    bssid,
                    auth_type,
                    rates: previous.1.unwrap_or_default(),
                    channel: params.bss.channel,
                    keys: if authenticated {
                        Some(SessionKeys { kck: params.kck, kek: params.kek })
                    } else {
                        None
                    },
                    replay_counter: if authenticated { Some(params.replay_counter) } else { None },
                    pmk: params.pmk,
                };
                let pmkid = params.pmkid;
                let _ = self.with_session(handle, |s| {
                    s.connected_profile = Some(connected);
                    s.roaming_reason = RoamingReason::NotRoaming;
                    if let Some(pmkid) = pmkid {
                        match auth_type {
                            AuthType::Wapi => s.bkid_cache.insert(bssid, pmkid),
                            _ => s.pmkid_cache.insert(bssid, pmkid),
                        }
                    }
                });
                if authenticated {
                    self.cancel_wait_for_key_timer(handle);
                    self.force_state(vdev_id, State::Joined, Substate::JoinedNoTraffic);
                } else {
                    self.force_state(vdev_id, State::Joined, Substate::WaitForKey);
                    self.arm_wait_for_key_timer(handle);
                }
            }
            AuthStatus::Unknown => {
                warn!("vdev {}: roam sync with unknown auth status; dropping the link", vdev_id);
                self.cancel_wait_for_key_timer(handle);
                let _ = self.with_session(handle, |s| {
                    if s.connected_profile.take().is_some() {
                        s.disconnect_stats.disconnection_count += 1;
                    }
                    s.roaming_reason = RoamingReason::NotRoaming;
                });
                self.reset_to_idle(vdev_id);
                self.notify(InfoEvent::Disconnected {
                    vdev_id,
                    cause: DisconnectCause::RoamSyncFailure,
                });
            }
        }

        self.resume_offloads(handle, OffloadTrigger::RoamSync);
        let _ = self.with_session(handle, |s| s.roam_sync_in_progress = false);
        self.notify(InfoEvent::RoamSynced { vdev_id, bssid, auth_status: params.auth_status });
        self.process_commands();
        Ok(())
    }
}
