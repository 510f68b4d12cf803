// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod pmkid;

use {
    crate::{
        error::Error,
        profile::{ConnectedProfile, RoamProfile},
        timer::EventId,
        BssDescription, Bssid, MacAddr, VdevId, MAX_SESSIONS,
    },
    self::pmkid::{BkidCache, PmkidCache},
};

/// Refers to one open session. Goes stale once the session is closed, even if the same vdev
/// is opened again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: usize,
    generation: u32,
}

impl SessionHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn vdev_id(&self) -> VdevId {
        self.index as VdevId
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinStatus {
    pub status_code: u16,
    pub reason_code: u16,
    pub bssid: Bssid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoamingReason {
    NotRoaming,
    LostLinkDisassoc,
    LostLinkDeauth,
    DynamicRoaming,
    ReassocRoaming,
}

impl Default for RoamingReason {
    fn default() -> Self {
        RoamingReason::NotRoaming
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisconnectStats {
    pub disconnection_count: u32,
    pub by_app: u32,
    pub disassoc_by_peer: u32,
    pub deauth_by_peer: u32,
    pub beacon_miss: u32,
    pub peer_kickout: u32,
}

/// Profile and ranked candidates of the last successful connect, kept for lost-link roaming.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredProfile {
    pub profile: RoamProfile,
    pub candidates: Vec<BssDescription>,
}

#[derive(Debug)]
pub struct Session {
    pub vdev_id: VdevId,
    pub self_addr: MacAddr,
    pub connected_profile: Option<ConnectedProfile>,
    pub roaming_reason: RoamingReason,
    pub pmkid_cache: PmkidCache,
    pub bkid_cache: BkidCache,
    /// Join requests issued over the life of the session.
    pub join_attempts: u32,
    /// BSSs tried by the current (or last) roam command.
    pub join_bssid_count: u32,
    pub join_fail_status: Option<JoinStatus>,
    pub disconnect_stats: DisconnectStats,
    pub roam_sync_in_progress: bool,
    pub offloads_paused: bool,
    pub roaming_timer: Option<EventId>,
    pub wait_for_key_timer: Option<EventId>,
    pub stored_profile: Option<StoredProfile>,
}

impl Session {
    fn new(vdev_id: VdevId, self_addr: MacAddr, pmkid_capacity: usize, bkid_capacity: usize) -> Self {
        Session {
            vdev_id,
            self_addr,
            connected_profile: None,
            roaming_reason: RoamingReason::NotRoaming,
            pmkid_cache: PmkidCache::new(pmkid_capacity),
            bkid_cache: BkidCache::new(bkid_capacity),
            join_attempts: 0,
            join_bssid_count: 0,
            join_fail_status: None,
            disconnect_stats: DisconnectStats::default(),
            roam_sync_in_progress: false,
            offloads_paused: false,
            roaming_timer: None,
            wait_for_key_timer: None,
            stored_profile: None,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    session: Option<Session>,
}

/// Fixed arena of sessions indexed by vdev id.
#[derive(Debug)]
pub struct SessionStore {
    slots: Vec<Slot>,
    pmkid_capacity: usize,
    bkid_capacity: usize,
}

impl SessionStore {
    pub fn new(pmkid_capacity: usize, bkid_capacity: usize) -> Self {
        SessionStore {
            slots: (0..MAX_SESSIONS).map(|_| Slot::default()).collect(),
            pmkid_capacity,
            bkid_capacity,
        }
    }

    pub fn open(&mut self, vdev_id: VdevId, self_addr: MacAddr) -> Result<SessionHandle, Error> {
        let index = usize::from(vdev_id);
        let (pmkid_capacity, bkid_capacity) = (self.pmkid_capacity, self.bkid_capacity);
        let slot = self.slots.get_mut(index).ok_or(Error::InvalidSession(index))?;
        if slot.session.is_some() {
            return Err(Error::AlreadyActive(vdev_id));
        }
        slot.session = Some(Session::new(vdev_id, self_addr, pmkid_capacity, bkid_capacity));
        Ok(SessionHandle { index, generation: slot.generation })
    }

    pub fn close(&mut self, handle: SessionHandle) -> Result<Session, Error> {
        self.get(handle)?;
        let slot = &mut self.slots[handle.index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.session.take().ok_or(Error::InvalidSession(handle.index))
    }

    pub fn get(&self, handle: SessionHandle) -> Result<&Session, Error> {
        match self.slots.get(handle.index) {
            Some(Slot { generation, session: Some(session) }) if *generation == handle.generation => {
                Ok(session)
            }
            _ => Err(Error::InvalidSession(handle.index)),
        }
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Result<&mut Session, Error> {
        match self.slots.get_mut(handle.index) {
            Some(Slot { generation, session: Some(session) }) if *generation == handle.generation => {
                Ok(session)
            }
            _ => Err(Error::InvalidSession(handle.index)),
        }
    }

    /// Live handle of the session open on `vdev_id`, if any.
    pub fn handle_for(&self, vdev_id: VdevId) -> Option<SessionHandle> {
        let index = usize::from(vdev_id);
        match self.slots.get(index) {
            Some(Slot { generation, session: Some(_) }) => {
                Some(SessionHandle { index, generation: *generation })
            }
            _ => None,
        }
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        (0..self.slots.len()).filter_map(|index| self.handle_for(index as VdevId)).collect()
    }
}
