// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod candidate;
pub mod event;
pub mod state;
pub mod sync;

use {
    self::{
        event::TimedEvent,
        state::{
            check_transition, is_disconnect_requested, is_joined_substate, is_link_down,
            RoamState, State, Substate,
        },
    },
    crate::{
        channel::{Band, ChannelCache, ChannelPowerInfo},
        command::{
            CandidateList, Command, CommandKind, CommandType, DisconnectCommand, IdGenerator,
            RoamCommand, RoamId, RoamReason, ScanCommand, ScanPurpose, SetKeyCommand, TxnId,
            WmStatusChange,
        },
        config::RoamConfig,
        error::{Error, TimeoutKind},
        power::{OffloadTrigger, PowerOffload},
        profile::{AuthType, ConnectedProfile, KeyDescriptor, KeyType, RoamProfile},
        queue::{CommandQueue, ListKind, Promotion, PurgeScope},
        session::{
            DisconnectStats, JoinStatus, RoamingReason, Session, SessionHandle, SessionStore,
            StoredProfile,
        },
        sink::{FwSink, InfoSink, UnboundedSink},
        timer::{self, EventId, TimeStream, Timer},
        BssDescription, Bssid, ChannelNumber, FwPayload, FwRequest, FwStatus, FwStream,
        InfoStream, MacAddr, MacFmt, Pmkid, Ssid, VdevId, BROADCAST_ADDR, MAX_SESSIONS,
    },
    anyhow::Context,
    futures::channel::mpsc,
    log::{debug, error, info, warn},
    parking_lot::Mutex,
    std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

pub use self::sync::{AuthStatus, RoamSyncParams};

// IEEE 802.11 reason codes.
const REASON_UNSPECIFIED: u16 = 1;
const REASON_DEAUTH_LEAVING: u16 = 3;
const REASON_INACTIVITY: u16 = 4;
const REASON_DISASSOC_LEAVING: u16 = 8;
const REASON_4WAY_HANDSHAKE_TIMEOUT: u16 = 15;
const REASON_LOW_ACK: u16 = 34;

/// Reason code of a link loss detected locally, without a frame from the peer.
pub const REASON_BEACON_MISS: u16 = 0;

#[derive(Clone, Debug, PartialEq)]
pub struct ConnectRequest {
    pub profile: RoamProfile,
    /// Scan results to pick candidates from. An empty list starts with a scan.
    pub bss_list: Vec<BssDescription>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectResult {
    Success,
    Canceled,
    Failed,
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    UserRequested,
    Forced,
    Deauth,
    KeyHandshakeTimeout,
}

impl DisconnectReason {
    fn substate(&self) -> Substate {
        match self {
            DisconnectReason::UserRequested => Substate::DisassocReq,
            DisconnectReason::Forced => Substate::DisassocForced,
            DisconnectReason::Deauth | DisconnectReason::KeyHandshakeTimeout => Substate::DeauthReq,
        }
    }

    /// Reason of the disconnect a substate stands for, if it is one.
    fn for_substate(substate: Substate) -> Option<Self> {
        match substate {
            Substate::DisassocReq => Some(DisconnectReason::UserRequested),
            Substate::DisassocForced => Some(DisconnectReason::Forced),
            Substate::DeauthReq => Some(DisconnectReason::Deauth),
            _ => None,
        }
    }

    fn sends_deauth(&self) -> bool {
        self.substate() == Substate::DeauthReq
    }

    pub fn reason_code(&self) -> u16 {
        match self {
            DisconnectReason::UserRequested => REASON_DISASSOC_LEAVING,
            DisconnectReason::Forced => REASON_UNSPECIFIED,
            DisconnectReason::Deauth => REASON_DEAUTH_LEAVING,
            DisconnectReason::KeyHandshakeTimeout => REASON_4WAY_HANDSHAKE_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkLossKind {
    Disassoc,
    Deauth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrafficClass {
    None,
    NonRealtime,
    Realtime,
}

impl TrafficClass {
    fn substate(&self) -> Substate {
        match self {
            TrafficClass::None => Substate::JoinedNoTraffic,
            TrafficClass::NonRealtime => Substate::JoinedNonRealtimeTraffic,
            TrafficClass::Realtime => Substate::JoinedRealtimeTraffic,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectCause {
    Requested(DisconnectReason),
    LinkLoss { kind: LinkLossKind, reason_code: u16 },
    ReassocFailure,
    RoamSyncFailure,
}

/// Notifications to the upper layer.
#[derive(Clone, Debug, PartialEq)]
pub enum InfoEvent {
    ConnectStarted { vdev_id: VdevId, roam_id: RoamId },
    ConnectFinished {
        vdev_id: VdevId,
        roam_id: RoamId,
        result: ConnectResult,
        /// Last join failure of the attempt, if any.
        failure: Option<JoinStatus>,
    },
    Disconnected { vdev_id: VdevId, cause: DisconnectCause },
    RoamSynced { vdev_id: VdevId, bssid: Bssid, auth_status: AuthStatus },
    ScanFinished { vdev_id: VdevId, status: FwStatus, results: Vec<BssDescription> },
    KeyInstalled { vdev_id: VdevId, key_type: KeyType },
    BssStarted { vdev_id: VdevId },
    BssStopped { vdev_id: VdevId },
    SessionClosed { vdev_id: VdevId },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub state: State,
    pub substate: Substate,
    pub roaming_reason: RoamingReason,
    pub connected: Option<ConnectedProfile>,
    pub join_attempts: u32,
    pub join_bssid_count: u32,
    pub join_fail_status: Option<JoinStatus>,
    pub disconnect_stats: DisconnectStats,
    pub pending_commands: usize,
    pub active_command: Option<CommandType>,
    pub roam_sync_in_progress: bool,
    pub offloads_paused: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub invalid_transitions: u64,
    /// Firmware results whose transaction no active command waits on.
    pub dropped_results: u64,
    pub purged_commands: u64,
    pub dropped_country_votes: u64,
    /// Firmware requests and info events sent after their receiver was dropped.
    pub dropped_fw_requests: u64,
    pub dropped_info_events: u64,
}

#[derive(Debug, Default)]
struct Counters {
    invalid_transitions: AtomicU64,
    dropped_results: AtomicU64,
    purged_commands: AtomicU64,
}

/// What happens to an active command after it ran a step.
#[derive(Debug)]
enum Step {
    /// A request went to firmware. The command stays active until the result arrives.
    Wait(TxnId),
    /// The command leaves the active list. A follow-up command is queued at the head.
    Done(Option<Command>),
}

/// Connection and roaming core of one radio.
///
/// Every public entry point runs under the radio's serial event guard. Within an entry point,
/// locks are taken in the order: command queue lists, roam states, sessions, channel cache,
/// timer. No lock is held across a firmware round-trip.
pub struct RoamStateMachine {
    cfg: RoamConfig,
    serial: Mutex<()>,
    queue: CommandQueue,
    roam_states: Mutex<[RoamState; MAX_SESSIONS]>,
    sessions: Mutex<SessionStore>,
    channels: Mutex<ChannelCache>,
    timer: Mutex<Timer<TimedEvent>>,
    roam_ids: IdGenerator,
    txn_ids: IdGenerator,
    fw_sink: FwSink,
    info_sink: InfoSink,
    power: Arc<dyn PowerOffload>,
    counters: Counters,
}

impl RoamStateMachine {
    /// Fails if `cfg` does not pass `RoamConfig::validate`.
    pub fn new(
        cfg: RoamConfig,
        power: Arc<dyn PowerOffload>,
    ) -> Result<(Self, FwStream, InfoStream, TimeStream), anyhow::Error> {
        cfg.validate().context("invalid roam config")?;
        let (fw_sender, fw_stream) = mpsc::unbounded();
        let (info_sender, info_stream) = mpsc::unbounded();
        let (timer, time_stream) = timer::create_timer();
        let machine = RoamStateMachine {
            serial: Mutex::new(()),
            queue: CommandQueue::new(cfg.command_queue_capacity),
            roam_states: Mutex::new([RoamState::default(); MAX_SESSIONS]),
            sessions: Mutex::new(SessionStore::new(
                cfg.pmkid_cache_capacity,
                cfg.bkid_cache_capacity,
            )),
            channels: Mutex::new(ChannelCache::new(
                cfg.max_country_votes,
                cfg.default_country,
                cfg.dfs_roaming_allowed,
            )),
            timer: Mutex::new(timer),
            roam_ids: IdGenerator::new(),
            txn_ids: IdGenerator::new(),
            fw_sink: UnboundedSink::new("firmware request", fw_sender),
            info_sink: UnboundedSink::new("info event", info_sender),
            power,
            counters: Counters::default(),
            cfg,
        };
        Ok((machine, fw_stream, info_stream, time_stream))
    }

    pub fn config(&self) -> &RoamConfig {
        &self.cfg
    }

    pub fn open_session(&self, vdev_id: VdevId, self_addr: MacAddr) -> Result<SessionHandle, Error> {
        let _serial = self.serial.lock();
        let handle = self.sessions.lock().open(vdev_id, self_addr)?;
        self.force_state(vdev_id, State::Idle, Substate::None);
        info!("opened session for vdev {} ({})", vdev_id, self_addr.to_mac_str());
        Ok(handle)
    }

    /// Purges every command of the session, closes it, and asks firmware to delete the station.
    /// `SessionClosed` follows once firmware confirms.
    pub fn close_session(&self, handle: SessionHandle) -> Result<(), Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        let vdev_id = handle.vdev_id();
        let purged = self.queue.purge_for_vdev(vdev_id, PurgeScope::ActiveAndPending);
        self.cancel_purged(purged);
        let session = self.sessions.lock().close(handle)?;
        {
            let mut timer = self.timer.lock();
            for id in [session.roaming_timer, session.wait_for_key_timer].iter().flatten() {
                timer.cancel_event(*id);
            }
        }
        if session.offloads_paused {
            self.power.resume_traffic_dependent_offloads(vdev_id, OffloadTrigger::Disconnect);
        }
        self.force_state(vdev_id, State::Stop, Substate::None);
        info!("closed session for vdev {}", vdev_id);

        let delete = Command::new(
            self.next_roam_id(),
            vdev_id,
            CommandKind::DeleteStationForSession { self_addr: session.self_addr },
        );
        if let Err(e) = self.queue.enqueue_pending_head(delete) {
            error!("cannot delete station of vdev {}: {}", vdev_id, e);
            self.notify(InfoEvent::SessionClosed { vdev_id });
        }
        self.process_commands();
        Ok(())
    }

    /// Connects with `req.profile`. Joined sessions drop their current association first.
    pub fn request_connect(
        &self,
        handle: SessionHandle,
        req: ConnectRequest,
    ) -> Result<RoamId, Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        let vdev_id = handle.vdev_id();
        let ConnectRequest { profile, bss_list } = req;
        let kind = if bss_list.is_empty() {
            CommandKind::Scan(ScanCommand {
                ssid: Some(profile.ssid.clone()),
                purpose: ScanPurpose::Connect(Box::new(profile)),
            })
        } else {
            self.merge_country_votes(&bss_list);
            let candidates = self.rank_candidates(handle, &profile, bss_list);
            if candidates.is_empty() {
                warn!("vdev {}: no BSS matches {:?}", vdev_id, String::from_utf8_lossy(&profile.ssid));
                return Err(Error::CandidateExhausted);
            }
            CommandKind::Roam(RoamCommand {
                reason: RoamReason::Connect,
                profile: Box::new(profile),
                candidates: CandidateList::new(candidates),
            })
        };
        let id = self.next_roam_id();
        self.queue.enqueue_pending(Command::new(id, vdev_id, kind))?;
        self.process_commands();
        Ok(id)
    }

    /// Cancels connect attempts of the session and queues a disassociation or deauthentication.
    pub fn request_disconnect(
        &self,
        handle: SessionHandle,
        reason: DisconnectReason,
    ) -> Result<RoamId, Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        let vdev_id = handle.vdev_id();
        let mut purged = self.queue.purge_for_vdev(vdev_id, PurgeScope::RoamOnly);
        purged.extend(self.queue.purge_for_vdev(vdev_id, PurgeScope::ScanOnly));
        self.cancel_purged(purged);
        let id = self.next_roam_id();
        let cmd = Command::new(id, vdev_id, CommandKind::Disconnect(DisconnectCommand { reason }));
        self.queue.enqueue_pending(cmd)?;
        self.process_commands();
        Ok(id)
    }

    /// The peer or the firmware dropped the link. Ignored unless the session is joined.
    pub fn indicate_link_loss(
        &self,
        handle: SessionHandle,
        kind: LinkLossKind,
        reason_code: u16,
    ) -> Result<(), Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        let vdev_id = handle.vdev_id();
        let current = self.roam_state(vdev_id);
        if current.state != State::Joined {
            info!("vdev {}: ignoring {:?} link loss in {:?}", vdev_id, kind, current.state);
            return Ok(());
        }
        self.change_substate(vdev_id, Substate::DisassocStaHasLeft)?;
        let purged = self.queue.purge_for_vdev(vdev_id, PurgeScope::ActiveAndPending);
        let requested = purged
            .iter()
            .find_map(|cmd| match &cmd.kind {
                CommandKind::Disconnect(DisconnectCommand { reason }) => Some(*reason),
                _ => None,
            })
            .or_else(|| DisconnectReason::for_substate(current.substate));
        self.cancel_purged(purged);
        self.cancel_wait_for_key_timer(handle);
        let peer = self.with_session(handle, |s| {
            let stats = &mut s.disconnect_stats;
            if requested.is_none() {
                stats.disconnection_count += 1;
                s.roaming_reason = match kind {
                    LinkLossKind::Disassoc => RoamingReason::LostLinkDisassoc,
                    LinkLossKind::Deauth => RoamingReason::LostLinkDeauth,
                };
            }
            match kind {
                LinkLossKind::Disassoc => stats.disassoc_by_peer += 1,
                LinkLossKind::Deauth => stats.deauth_by_peer += 1,
            }
            match reason_code {
                REASON_BEACON_MISS => stats.beacon_miss += 1,
                REASON_INACTIVITY | REASON_LOW_ACK => stats.peer_kickout += 1,
                _ => {}
            }
            s.connected_profile.as_ref().map_or(BROADCAST_ADDR, |p| p.bssid)
        })?;
        if let Some(reason) = requested {
            info!(
                "vdev {}: {} dropped the link while we were leaving; completing {:?}",
                vdev_id,
                peer.to_mac_str(),
                reason
            );
            self.complete_disconnect(handle, reason, FwStatus::Success);
            self.process_commands();
            return Ok(());
        }
        warn!(
            "vdev {}: lost link to {} ({:?}, reason {})",
            vdev_id,
            peer.to_mac_str(),
            kind,
            reason_code
        );
        let change = WmStatusChange { kind, reason_code, peer };
        let cmd = Command::new(self.next_roam_id(), vdev_id, CommandKind::WmStatusChange(change));
        self.queue.enqueue_pending_head(cmd)?;
        self.process_commands();
        Ok(())
    }

    /// Moves a joined session to another BSS of its ESS by reassociation.
    pub fn request_reassoc(
        &self,
        handle: SessionHandle,
        bss: BssDescription,
    ) -> Result<RoamId, Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        let vdev_id = handle.vdev_id();
        self.check_substate(vdev_id, Substate::ReassocReq)?;
        let connected = self.with_session(handle, |s| s.connected_profile.clone())?;
        let connected = match connected {
            Some(connected) => connected,
            None => {
                let from = self.roam_state(vdev_id).substate;
                return Err(Error::InvalidTransition { from, to: Substate::ReassocReq });
            }
        };
        let profile = RoamProfile {
            ssid: connected.ssid,
            bssid: Some(bss.bssid),
            auth_type: connected.auth_type,
            rates: connected.rates,
            assoc_ies: vec![],
        };
        let id = self.next_roam_id();
        let kind = CommandKind::Roam(RoamCommand {
            reason: RoamReason::Reassoc,
            profile: Box::new(profile),
            candidates: CandidateList::new(vec![bss]),
        });
        self.queue.enqueue_pending(Command::new(id, vdev_id, kind))?;
        self.process_commands();
        Ok(id)
    }

    pub fn request_scan(&self, handle: SessionHandle, ssid: Option<Ssid>) -> Result<RoamId, Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        let kind = CommandKind::Scan(ScanCommand { ssid, purpose: ScanPurpose::Discovery });
        self.queue_command(handle, kind)
    }

    pub fn request_set_key(&self, handle: SessionHandle, key: KeyDescriptor) -> Result<RoamId, Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        self.queue_command(handle, CommandKind::SetKey(SetKeyCommand { key }))
    }

    pub fn request_start_bss(
        &self,
        handle: SessionHandle,
        ssid: Ssid,
        channel: ChannelNumber,
    ) -> Result<RoamId, Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        self.queue_command(handle, CommandKind::StartBss { ssid, channel })
    }

    pub fn request_stop_bss(&self, handle: SessionHandle) -> Result<RoamId, Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        self.queue_command(handle, CommandKind::StopBss)
    }

    pub fn indicate_traffic(&self, handle: SessionHandle, class: TrafficClass) -> Result<(), Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        let vdev_id = handle.vdev_id();
        let target = class.substate();
        if self.roam_state(vdev_id).substate == target {
            return Ok(());
        }
        self.change_substate(vdev_id, target)
    }

    pub fn set_pmkid(&self, handle: SessionHandle, bssid: Bssid, pmkid: Pmkid) -> Result<(), Error> {
        let _serial = self.serial.lock();
        self.with_session(handle, |s| s.pmkid_cache.insert(bssid, pmkid))
    }

    pub fn set_bkid(&self, handle: SessionHandle, bssid: Bssid, bkid: Pmkid) -> Result<(), Error> {
        let _serial = self.serial.lock();
        self.with_session(handle, |s| s.bkid_cache.insert(bssid, bkid))
    }

    /// Explicit substate change, checked against the transition table.
    pub fn substate_change(&self, handle: SessionHandle, to: Substate) -> Result<(), Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        self.change_substate(handle.vdev_id(), to)
    }

    pub fn configure_channels(&self, band: Band, entries: Vec<ChannelPowerInfo>) {
        let _serial = self.serial.lock();
        self.channels.lock().set_power_info(band, entries);
    }

    /// Drops every queued and active command of the radio and returns all sessions to idle.
    pub fn reset_radio(&self) {
        let _serial = self.serial.lock();
        let purged = self.queue.purge_all();
        self.cancel_purged(purged);
        let handles = self.sessions.lock().handles();
        for handle in handles {
            self.cancel_roaming_timer(handle);
            self.cancel_wait_for_key_timer(handle);
            let _ = self.with_session(handle, |s| {
                s.connected_profile = None;
                s.roaming_reason = RoamingReason::NotRoaming;
                s.roam_sync_in_progress = false;
            });
            self.resume_offloads(handle, OffloadTrigger::Disconnect);
            self.reset_to_idle(handle.vdev_id());
        }
        self.channels.lock().clear_votes();
        info!("radio reset");
    }

    pub fn status(&self, handle: SessionHandle) -> Result<Status, Error> {
        let _serial = self.serial.lock();
        self.validate(handle)?;
        let vdev_id = handle.vdev_id();
        let pending_commands = self.queue.count_for_vdev(ListKind::Pending, vdev_id);
        let active_command = self.queue.active_for_vdev(vdev_id).map(|info| info.kind);
        let RoamState { state, substate } = self.roam_state(vdev_id);
        self.with_session(handle, |s| Status {
            state,
            substate,
            roaming_reason: s.roaming_reason,
            connected: s.connected_profile.clone(),
            join_attempts: s.join_attempts,
            join_bssid_count: s.join_bssid_count,
            join_fail_status: s.join_fail_status,
            disconnect_stats: s.disconnect_stats,
            pending_commands,
            active_command,
            roam_sync_in_progress: s.roam_sync_in_progress,
            offloads_paused: s.offloads_paused,
        })
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            invalid_transitions: self.counters.invalid_transitions.load(Ordering::Relaxed),
            dropped_results: self.counters.dropped_results.load(Ordering::Relaxed),
            purged_commands: self.counters.purged_commands.load(Ordering::Relaxed),
            dropped_country_votes: self.channels.lock().dropped_votes(),
            dropped_fw_requests: self.fw_sink.dropped(),
            dropped_info_events: self.info_sink.dropped(),
        }
    }

    /// Firmware completion of the request `txn_id`. Results no active command waits on, e.g.
    /// for commands purged meanwhile, are dropped.
    pub fn on_command_result(&self, txn_id: TxnId, status: FwStatus, payload: FwPayload) {
        let _serial = self.serial.lock();
        let id = self.queue.with_active(|active| {
            active.iter().find(|cmd| cmd.outstanding == Some(txn_id)).map(|cmd| cmd.id)
        });
        let id = match id {
            Some(id) => id,
            None => {
                self.counters.dropped_results.fetch_add(1, Ordering::Relaxed);
                debug!("dropping result of {:?}; no active command waits on it", txn_id);
                return;
            }
        };
        self.drive(id, |cmd| {
            cmd.outstanding = None;
            self.handle_result(cmd, status, payload)
        });
        self.process_commands();
    }

    pub fn on_timeout(&self, event_id: EventId) {
        let _serial = self.serial.lock();
        let event = match self.timer.lock().triggered(&event_id) {
            Some(event) => event,
            None => return,
        };
        let handle = event.session();
        if self.validate(handle).is_err() {
            debug!("ignoring {:?} of a closed session", event);
            return;
        }
        match event {
            TimedEvent::RoamingTimeout { roam_id, .. } => self.on_roaming_timeout(handle, roam_id),
            TimedEvent::WaitForKeyTimeout { .. } => self.on_wait_for_key_timeout(handle),
        }
        self.process_commands();
    }

    fn on_roaming_timeout(&self, handle: SessionHandle, roam_id: RoamId) {
        let vdev_id = handle.vdev_id();
        let _ = self.with_session(handle, |s| s.roaming_timer = None);
        warn!("vdev {}: {:?}: {}", vdev_id, roam_id, Error::Timeout(TimeoutKind::Roaming));
        let (timed_out, others): (Vec<_>, Vec<_>) = self
            .queue
            .purge_for_vdev(vdev_id, PurgeScope::RoamOnly)
            .into_iter()
            .partition(|cmd| cmd.id == roam_id);
        self.counters.purged_commands.fetch_add(timed_out.len() as u64, Ordering::Relaxed);
        self.cancel_purged(others);
        let failure = self
            .with_session(handle, |s| {
                s.connected_profile = None;
                s.roaming_reason = RoamingReason::NotRoaming;
                s.join_fail_status
            })
            .ok()
            .flatten();
        self.reset_to_idle(vdev_id);
        self.resume_offloads(handle, OffloadTrigger::Disconnect);
        self.report_connect_finished(vdev_id, roam_id, ConnectResult::Timeout, failure);
    }

    fn on_wait_for_key_timeout(&self, handle: SessionHandle) {
        let vdev_id = handle.vdev_id();
        let _ = self.with_session(handle, |s| s.wait_for_key_timer = None);
        let substate = self.roam_state(vdev_id).substate;
        if substate != Substate::WaitForKey {
            debug!("vdev {}: key timer fired in {:?}", vdev_id, substate);
            return;
        }
        warn!("vdev {}: {}", vdev_id, Error::Timeout(TimeoutKind::WaitForKey));
        let purged = self.queue.purge_for_vdev(vdev_id, PurgeScope::ActiveAndPending);
        self.cancel_purged(purged);
        let _ = self.change_substate(vdev_id, Substate::DisassocNothingToJoin);
        let deauth = DisconnectCommand { reason: DisconnectReason::KeyHandshakeTimeout };
        let cmd = Command::new(self.next_roam_id(), vdev_id, CommandKind::Disconnect(deauth));
        if let Err(e) = self.queue.enqueue_pending_head(cmd) {
            error!("vdev {}: cannot queue deauthentication: {}", vdev_id, e);
            self.reset_to_idle(vdev_id);
        }
    }

    // Command execution

    fn queue_command(&self, handle: SessionHandle, kind: CommandKind) -> Result<RoamId, Error> {
        let id = self.next_roam_id();
        self.queue.enqueue_pending(Command::new(id, handle.vdev_id(), kind))?;
        self.process_commands();
        Ok(id)
    }

    fn process_commands(&self) {
        loop {
            match self.queue.promote_head_to_active() {
                Promotion::Promoted(info) => self.drive(info.id, |cmd| self.start_command(cmd)),
                Promotion::Blocked(_) | Promotion::Empty => break,
            }
        }
    }

    /// Runs one step of the active command `id` and applies its outcome. The step works on a
    /// copy; no queue lock is held while it runs.
    fn drive(&self, id: RoamId, f: impl FnOnce(&mut Command) -> Step) {
        let mut cmd = match self.queue.active_command(id) {
            Some(cmd) => cmd,
            None => return,
        };
        match f(&mut cmd) {
            Step::Wait(txn_id) => {
                cmd.outstanding = Some(txn_id);
                if !self.queue.update_active(cmd) {
                    debug!("{:?} was purged while it ran; {:?} will be dropped", id, txn_id);
                }
            }
            Step::Done(follow_up) => {
                self.queue.remove_active(id);
                if let Some(cmd) = follow_up {
                    self.enqueue_follow_up(cmd);
                }
            }
        }
    }

    fn enqueue_follow_up(&self, cmd: Command) {
        let (id, vdev_id, connect) = (cmd.id, cmd.vdev_id, cmd.is_connect_attempt());
        if let Err(e) = self.queue.enqueue_pending_head(cmd) {
            error!("vdev {}: dropping follow-up {:?}: {}", vdev_id, id, e);
            if connect {
                if is_link_down(self.roam_state(vdev_id).substate) {
                    self.reset_to_idle(vdev_id);
                }
                self.report_connect_finished(vdev_id, id, ConnectResult::Failed, None);
            }
        }
    }

    fn start_command(&self, cmd: &mut Command) -> Step {
        let (id, vdev_id) = (cmd.id, cmd.vdev_id);
        if let CommandKind::DeleteStationForSession { self_addr } = cmd.kind {
            let txn_id = self.send_request(|txn_id| FwRequest::DeleteStation {
                txn_id,
                vdev_id,
                self_addr,
            });
            return Step::Wait(txn_id);
        }
        let handle = match self.handle_for(vdev_id) {
            Some(handle) => handle,
            None => {
                warn!("dropping {:?} {:?} of closed vdev {}", cmd.command_type(), id, vdev_id);
                return Step::Done(None);
            }
        };
        match &mut cmd.kind {
            CommandKind::Roam(roam) => self.start_roam(handle, id, roam),
            CommandKind::Scan(scan) => self.start_scan(handle, scan),
            CommandKind::SetKey(SetKeyCommand { key }) => {
                let key = key.clone();
                Step::Wait(self.send_request(|txn_id| FwRequest::SetKey { txn_id, vdev_id, key }))
            }
            CommandKind::WmStatusChange(change) => self.run_link_loss(handle, change),
            CommandKind::Disconnect(DisconnectCommand { reason }) => {
                self.start_disconnect(handle, *reason)
            }
            CommandKind::StartBss { ssid, channel } => {
                if self.change_substate(vdev_id, Substate::StartBssReq).is_err() {
                    return Step::Done(None);
                }
                self.enter_joining(handle, OffloadTrigger::Connect);
                let (ssid, channel) = (ssid.clone(), *channel);
                Step::Wait(self.send_request(|txn_id| FwRequest::StartBss {
                    txn_id,
                    vdev_id,
                    ssid,
                    channel,
                }))
            }
            CommandKind::StopBss => {
                if self.change_substate(vdev_id, Substate::StopBssReq).is_err() {
                    return Step::Done(None);
                }
                Step::Wait(self.send_request(|txn_id| FwRequest::StopBss { txn_id, vdev_id }))
            }
            CommandKind::DeleteStationForSession { .. } => Step::Done(None),
        }
    }

    fn handle_result(&self, cmd: &mut Command, status: FwStatus, payload: FwPayload) -> Step {
        let (id, vdev_id) = (cmd.id, cmd.vdev_id);
        if let CommandKind::DeleteStationForSession { .. } = cmd.kind {
            if !status.is_success() {
                error!("vdev {}: firmware failed to delete the station: {:?}", vdev_id, status);
            }
            self.notify(InfoEvent::SessionClosed { vdev_id });
            return Step::Done(None);
        }
        let handle = match self.handle_for(vdev_id) {
            Some(handle) => handle,
            None => return Step::Done(None),
        };
        match &mut cmd.kind {
            CommandKind::Roam(roam) => self.handle_roam_result(handle, id, roam, status),
            CommandKind::Scan(scan) => self.handle_scan_result(handle, id, scan, status, payload),
            CommandKind::SetKey(SetKeyCommand { key }) => {
                self.handle_set_key_result(handle, key.key_type, status)
            }
            CommandKind::Disconnect(DisconnectCommand { reason }) => {
                self.complete_disconnect(handle, *reason, status)
            }
            CommandKind::StartBss { .. } => {
                if status.is_success() {
                    let _ = self.change_substate(vdev_id, Substate::JoinedNoTraffic);
                    self.set_state(vdev_id, State::Joined);
                    self.notify(InfoEvent::BssStarted { vdev_id });
                } else {
                    error!("vdev {}: failed to start BSS: {:?}", vdev_id, status);
                    self.reset_to_idle(vdev_id);
                }
                self.resume_offloads(handle, OffloadTrigger::Connect);
                Step::Done(None)
            }
            CommandKind::StopBss => {
                if !status.is_success() {
                    error!("vdev {}: failed to stop BSS: {:?}", vdev_id, status);
                }
                self.reset_to_idle(vdev_id);
                self.notify(InfoEvent::BssStopped { vdev_id });
                Step::Done(None)
            }
            CommandKind::WmStatusChange(_) | CommandKind::DeleteStationForSession { .. } => {
                warn!("vdev {}: unexpected firmware result for {:?}", vdev_id, id);
                Step::Done(None)
            }
        }
    }

    fn start_roam(&self, handle: SessionHandle, id: RoamId, roam: &mut RoamCommand) -> Step {
        let vdev_id = handle.vdev_id();
        let current = self.roam_state(vdev_id).substate;
        let trigger = offload_trigger(roam.reason);
        let target = match roam.reason {
            RoamReason::Reassoc => Substate::ReassocReq,
            _ if is_joined_substate(current) || current == Substate::WaitForKey => {
                Substate::DisassocHandoff
            }
            _ => Substate::JoinReq,
        };
        if self.check_substate(vdev_id, target).is_err() {
            self.report_connect_finished(vdev_id, id, ConnectResult::Failed, None);
            return Step::Done(None);
        }

        let _ = self.with_session(handle, |s| {
            s.join_bssid_count = 0;
            s.join_fail_status = None;
            if roam.reason == RoamReason::Reassoc {
                s.roaming_reason = RoamingReason::ReassocRoaming;
            }
        });
        info!("vdev {}: starting {:?} {:?}", vdev_id, roam.reason, id);
        self.notify(InfoEvent::ConnectStarted { vdev_id, roam_id: id });
        self.enter_joining(handle, trigger);
        self.arm_roaming_timer(handle, id);

        match target {
            Substate::ReassocReq => {
                let bss = match roam.candidates.current() {
                    Some(bss) => bss.clone(),
                    None => return self.finish_roam(handle, id, ConnectResult::Failed),
                };
                let _ = self.change_substate(vdev_id, Substate::ReassocReq);
                let _ = self.with_session(handle, |s| {
                    s.join_bssid_count += 1;
                    s.join_attempts += 1;
                });
                let pmkid = self.cached_key_id(handle, roam.profile.auth_type, &bss.bssid);
                Step::Wait(self.send_request(|txn_id| FwRequest::Reassociate {
                    txn_id,
                    vdev_id,
                    bss,
                    pmkid,
                }))
            }
            Substate::DisassocHandoff => {
                let _ = self.change_substate(vdev_id, Substate::DisassocHandoff);
                self.cancel_wait_for_key_timer(handle);
                let bssid = self
                    .with_session(handle, |s| s.connected_profile.as_ref().map(|p| p.bssid))
                    .ok()
                    .flatten();
                match bssid {
                    Some(bssid) => Step::Wait(self.send_request(|txn_id| {
                        FwRequest::Disassociate {
                            txn_id,
                            vdev_id,
                            bssid,
                            reason_code: REASON_DISASSOC_LEAVING,
                        }
                    })),
                    None => self.continue_after_handoff(handle, id, roam),
                }
            }
            _ => self.join_next_candidate(handle, id, roam),
        }
    }

    fn continue_after_handoff(&self, handle: SessionHandle, id: RoamId, roam: &mut RoamCommand) -> Step {
        let vdev_id = handle.vdev_id();
        let _ = self.with_session(handle, |s| s.connected_profile = None);
        if self.change_substate(vdev_id, Substate::DisconnectContinueRoaming).is_err() {
            return self.finish_roam(handle, id, ConnectResult::Failed);
        }
        self.join_next_candidate(handle, id, roam)
    }

    fn join_next_candidate(&self, handle: SessionHandle, id: RoamId, roam: &mut RoamCommand) -> Step {
        let vdev_id = handle.vdev_id();
        let tried = self.with_session(handle, |s| s.join_bssid_count).unwrap_or(0);
        let bss = match roam.candidates.current() {
            Some(bss) if tried < u32::from(self.cfg.max_join_attempts) => bss.clone(),
            _ => {
                warn!("vdev {}: {:?} after {} join(s): {}", vdev_id, id, tried, Error::CandidateExhausted);
                return self.finish_roam(handle, id, ConnectResult::Failed);
            }
        };
        if self.change_substate(vdev_id, Substate::JoinReq).is_err() {
            return self.finish_roam(handle, id, ConnectResult::Failed);
        }
        let _ = self.with_session(handle, |s| {
            s.join_bssid_count += 1;
            s.join_attempts += 1;
        });
        let country = self.channels.lock().elect_country();
        info!("vdev {}: joining {} on channel {}", vdev_id, bss.bssid.to_mac_str(), bss.channel);
        Step::Wait(self.send_request(|txn_id| FwRequest::Join { txn_id, vdev_id, bss, country }))
    }

    fn handle_roam_result(
        &self,
        handle: SessionHandle,
        id: RoamId,
        roam: &mut RoamCommand,
        status: FwStatus,
    ) -> Step {
        let vdev_id = handle.vdev_id();
        let substate = self.roam_state(vdev_id).substate;
        let bss = match roam.candidates.current() {
            Some(bss) => bss.clone(),
            None => return self.finish_roam(handle, id, ConnectResult::Failed),
        };
        match (substate, status) {
            (Substate::DisassocHandoff, status) => {
                if !status.is_success() {
                    warn!("vdev {}: handoff disassociation failed: {:?}", vdev_id, status);
                }
                self.continue_after_handoff(handle, id, roam)
            }
            (Substate::JoinReq, FwStatus::Success) => {
                if self.change_substate(vdev_id, Substate::AuthReq).is_err() {
                    return self.finish_roam(handle, id, ConnectResult::Failed);
                }
                let auth_type = roam.profile.auth_type;
                let pmkid = self.cached_key_id(handle, auth_type, &bss.bssid);
                Step::Wait(self.send_request(|txn_id| FwRequest::Authenticate {
                    txn_id,
                    vdev_id,
                    bssid: bss.bssid,
                    auth_type,
                    pmkid,
                }))
            }
            (Substate::AuthReq, FwStatus::Success) => {
                if self.change_substate(vdev_id, Substate::Config).is_err() {
                    return self.finish_roam(handle, id, ConnectResult::Failed);
                }
                let tx_power = self.channels.lock().max_tx_power(bss.channel);
                let rates = roam.profile.rates.clone();
                Step::Wait(self.send_request(|txn_id| FwRequest::ConfigureBss {
                    txn_id,
                    vdev_id,
                    bssid: bss.bssid,
                    rates,
                    tx_power,
                }))
            }
            (Substate::Config, FwStatus::Success) | (Substate::ReassocReq, FwStatus::Success) => {
                self.join_complete(handle, id, roam, bss)
            }
            (Substate::ReassocReq, FwStatus::Failure { status_code, reason_code }) => {
                let failure = JoinStatus { status_code, reason_code, bssid: bss.bssid };
                error!("vdev {}: {}", vdev_id, Error::FirmwareReportedFailure(failure));
                let _ = self.with_session(handle, |s| {
                    s.join_fail_status = Some(failure);
                    s.disconnect_stats.disconnection_count += 1;
                });
                let _ = self.change_substate(vdev_id, Substate::DisassocReassocFailure);
                self.notify(InfoEvent::Disconnected { vdev_id, cause: DisconnectCause::ReassocFailure });
                self.finish_roam(handle, id, ConnectResult::Failed)
            }
            (Substate::JoinReq, FwStatus::Failure { status_code, reason_code })
            | (Substate::AuthReq, FwStatus::Failure { status_code, reason_code })
            | (Substate::Config, FwStatus::Failure { status_code, reason_code }) => {
                let failure = JoinStatus { status_code, reason_code, bssid: bss.bssid };
                error!("vdev {}: {:?} in {:?}: {}", vdev_id, id, substate, Error::FirmwareReportedFailure(failure));
                let _ = self.with_session(handle, |s| s.join_fail_status = Some(failure));
                roam.candidates.mark_current_failed();
                self.join_next_candidate(handle, id, roam)
            }
            (other, _) => {
                warn!("vdev {}: roam result for {:?} in unexpected substate {:?}", vdev_id, id, other);
                self.finish_roam(handle, id, ConnectResult::Failed)
            }
        }
    }

    fn join_complete(
        &self,
        handle: SessionHandle,
        id: RoamId,
        roam: &RoamCommand,
        bss: BssDescription,
    ) -> Step {
        let vdev_id = handle.vdev_id();
        let secured = roam.profile.auth_type.requires_keys();
        let target = if secured { Substate::WaitForKey } else { Substate::JoinedNoTraffic };
        if self.change_substate(vdev_id, target).is_err() {
            return self.finish_roam(handle, id, ConnectResult::Failed);
        }
        self.set_state(vdev_id, State::Joined);
        self.cancel_roaming_timer(handle);

        let connected = ConnectedProfile {
            ssid: bss.ssid.clone(),
            bssid: bss.bssid,
            auth_type: roam.profile.auth_type,
            rates: roam.profile.rates.clone(),
            channel: bss.channel,
            keys: None,
            replay_counter: None,
            pmk: None,
        };
        let stored = match roam.reason {
            RoamReason::Reassoc => None,
            _ => Some(StoredProfile {
                profile: (*roam.profile).clone(),
                candidates: roam.candidates.entries().to_vec(),
            }),
        };
        let _ = self.with_session(handle, |s| {
            s.connected_profile = Some(connected);
            s.roaming_reason = RoamingReason::NotRoaming;
            if stored.is_some() {
                s.stored_profile = stored;
            }
        });
        if secured {
            self.arm_wait_for_key_timer(handle);
        }
        self.resume_offloads(handle, offload_trigger(roam.reason));
        info!("vdev {}: joined {} ({:?})", vdev_id, bss.bssid.to_mac_str(), target);
        self.report_connect_finished(vdev_id, id, ConnectResult::Success, None);
        Step::Done(None)
    }

    /// Ends a roam command that did not reach a joined state.
    fn finish_roam(&self, handle: SessionHandle, id: RoamId, result: ConnectResult) -> Step {
        let vdev_id = handle.vdev_id();
        self.cancel_roaming_timer(handle);
        let failure = self
            .with_session(handle, |s| {
                s.connected_profile = None;
                s.roaming_reason = RoamingReason::NotRoaming;
                s.join_fail_status
            })
            .ok()
            .flatten();
        self.reset_to_idle(vdev_id);
        self.resume_offloads(handle, OffloadTrigger::Disconnect);
        self.report_connect_finished(vdev_id, id, result, failure);
        Step::Done(None)
    }

    fn start_scan(&self, handle: SessionHandle, scan: &ScanCommand) -> Step {
        let vdev_id = handle.vdev_id();
        let (channels, country) = {
            let cache = self.channels.lock();
            (cache.scan_channels(), cache.elect_country())
        };
        let ssid = scan.ssid.clone();
        Step::Wait(self.send_request(|txn_id| FwRequest::Scan {
            txn_id,
            vdev_id,
            ssid,
            channels,
            country,
        }))
    }

    fn handle_scan_result(
        &self,
        handle: SessionHandle,
        id: RoamId,
        scan: &ScanCommand,
        status: FwStatus,
        payload: FwPayload,
    ) -> Step {
        let vdev_id = handle.vdev_id();
        let results = match payload {
            FwPayload::ScanResults(results) if status.is_success() => results,
            _ => vec![],
        };
        if status.is_success() {
            self.merge_country_votes(&results);
        } else {
            error!("vdev {}: scan failed: {:?}", vdev_id, status);
        }
        self.notify(InfoEvent::ScanFinished { vdev_id, status, results: results.clone() });

        let profile = match &scan.purpose {
            ScanPurpose::Discovery => return Step::Done(None),
            ScanPurpose::Connect(profile) => profile,
        };
        let candidates = self.rank_candidates(handle, profile, results);
        if candidates.is_empty() {
            warn!("vdev {}: connect scan for {:?} found no candidate", vdev_id, id);
            self.report_connect_finished(vdev_id, id, ConnectResult::Failed, None);
            return Step::Done(None);
        }
        let roam = RoamCommand {
            reason: RoamReason::Connect,
            profile: profile.clone(),
            candidates: CandidateList::new(candidates),
        };
        Step::Done(Some(Command::new(id, vdev_id, CommandKind::Roam(roam))))
    }

    fn handle_set_key_result(&self, handle: SessionHandle, key_type: KeyType, status: FwStatus) -> Step {
        let vdev_id = handle.vdev_id();
        if !status.is_success() {
            error!("vdev {}: failed to install {:?} key: {:?}", vdev_id, key_type, status);
            return Step::Done(None);
        }
        self.notify(InfoEvent::KeyInstalled { vdev_id, key_type });
        if self.roam_state(vdev_id).substate == Substate::WaitForKey {
            self.cancel_wait_for_key_timer(handle);
            let _ = self.change_substate(vdev_id, Substate::JoinedNoTraffic);
        }
        Step::Done(None)
    }

    fn run_link_loss(&self, handle: SessionHandle, change: &WmStatusChange) -> Step {
        let vdev_id = handle.vdev_id();
        self.notify(InfoEvent::Disconnected {
            vdev_id,
            cause: DisconnectCause::LinkLoss { kind: change.kind, reason_code: change.reason_code },
        });
        let stored = self
            .with_session(handle, |s| {
                s.connected_profile = None;
                s.stored_profile.clone()
            })
            .ok()
            .flatten();
        self.set_state(vdev_id, State::Idle);

        if let (true, Some(stored)) = (self.cfg.lost_link_roaming, stored) {
            let candidates: Vec<_> =
                stored.candidates.into_iter().filter(|bss| bss.bssid != change.peer).collect();
            if !candidates.is_empty()
                && self.change_substate(vdev_id, Substate::DisconnectContinueRoaming).is_ok()
            {
                info!("vdev {}: roaming to {} stored candidate(s)", vdev_id, candidates.len());
                let roam = RoamCommand {
                    reason: RoamReason::LostLink,
                    profile: Box::new(stored.profile),
                    candidates: CandidateList::new(candidates),
                };
                let cmd = Command::new(self.next_roam_id(), vdev_id, CommandKind::Roam(roam));
                return Step::Done(Some(cmd));
            }
        }
        let _ = self.with_session(handle, |s| s.roaming_reason = RoamingReason::NotRoaming);
        self.reset_to_idle(vdev_id);
        Step::Done(None)
    }

    fn start_disconnect(&self, handle: SessionHandle, reason: DisconnectReason) -> Step {
        let vdev_id = handle.vdev_id();
        let current = self.roam_state(vdev_id).substate;
        if !is_link_down(current) && !is_disconnect_requested(current) {
            if self.change_substate(vdev_id, reason.substate()).is_err() {
                return Step::Done(None);
            }
        }
        self.cancel_wait_for_key_timer(handle);
        let bssid = self
            .with_session(handle, |s| s.connected_profile.as_ref().map(|p| p.bssid))
            .ok()
            .flatten();
        let bssid = match bssid {
            Some(bssid) => bssid,
            None => return self.complete_disconnect(handle, reason, FwStatus::Success),
        };
        let reason_code = reason.reason_code();
        info!("vdev {}: leaving {} ({:?})", vdev_id, bssid.to_mac_str(), reason);
        Step::Wait(self.send_request(|txn_id| {
            if reason.sends_deauth() {
                FwRequest::Deauthenticate { txn_id, vdev_id, bssid, reason_code }
            } else {
                FwRequest::Disassociate { txn_id, vdev_id, bssid, reason_code }
            }
        }))
    }

    fn complete_disconnect(
        &self,
        handle: SessionHandle,
        reason: DisconnectReason,
        status: FwStatus,
    ) -> Step {
        let vdev_id = handle.vdev_id();
        if !status.is_success() {
            warn!("vdev {}: firmware failed {:?}: {:?}; dropping the link anyway", vdev_id, reason, status);
        }
        let _ = self.with_session(handle, |s| {
            if s.connected_profile.take().is_some() {
                s.disconnect_stats.disconnection_count += 1;
                if reason == DisconnectReason::UserRequested {
                    s.disconnect_stats.by_app += 1;
                }
            }
            s.roaming_reason = RoamingReason::NotRoaming;
        });
        self.reset_to_idle(vdev_id);
        self.resume_offloads(handle, OffloadTrigger::Disconnect);
        self.notify(InfoEvent::Disconnected { vdev_id, cause: DisconnectCause::Requested(reason) });
        Step::Done(None)
    }

    /// Accounts for purged commands and tells the upper layer about canceled connect attempts.
    fn cancel_purged(&self, purged: Vec<Command>) {
        if purged.is_empty() {
            return;
        }
        self.counters.purged_commands.fetch_add(purged.len() as u64, Ordering::Relaxed);
        for cmd in purged {
            debug!("purged {:?} {:?} of vdev {}", cmd.command_type(), cmd.id, cmd.vdev_id);
            match cmd.command_type() {
                CommandType::Roam if cmd.outstanding.is_some() => {
                    // The roam was running; nothing else will stop its timer.
                    if let Some(handle) = self.handle_for(cmd.vdev_id) {
                        self.cancel_roaming_timer(handle);
                        self.resume_offloads(handle, OffloadTrigger::Disconnect);
                    }
                }
                CommandType::DeleteStation => {
                    self.notify(InfoEvent::SessionClosed { vdev_id: cmd.vdev_id })
                }
                _ => {}
            }
            if cmd.is_connect_attempt() {
                self.report_connect_finished(cmd.vdev_id, cmd.id, ConnectResult::Canceled, None);
            }
        }
    }

    // Helpers. Each takes a single lock for a short section.

    fn validate(&self, handle: SessionHandle) -> Result<(), Error> {
        self.sessions.lock().get(handle).map(|_| ())
    }

    fn with_session<R>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, Error> {
        self.sessions.lock().get_mut(handle).map(f)
    }

    fn handle_for(&self, vdev_id: VdevId) -> Option<SessionHandle> {
        self.sessions.lock().handle_for(vdev_id)
    }

    fn next_roam_id(&self) -> RoamId {
        RoamId(self.roam_ids.next())
    }

    fn send_request(&self, build: impl FnOnce(TxnId) -> FwRequest) -> TxnId {
        let txn_id = TxnId(self.txn_ids.next());
        self.fw_sink.send(build(txn_id));
        txn_id
    }

    fn notify(&self, event: InfoEvent) {
        self.info_sink.send(event);
    }

    fn report_connect_finished(
        &self,
        vdev_id: VdevId,
        roam_id: RoamId,
        result: ConnectResult,
        failure: Option<JoinStatus>,
    ) {
        match result {
            ConnectResult::Success => info!("vdev {}: {:?} succeeded", vdev_id, roam_id),
            other => warn!("vdev {}: {:?} finished with {:?} ({:?})", vdev_id, roam_id, other, failure),
        }
        self.notify(InfoEvent::ConnectFinished { vdev_id, roam_id, result, failure });
    }

    fn roam_state(&self, vdev_id: VdevId) -> RoamState {
        self.roam_states.lock()[usize::from(vdev_id)]
    }

    fn set_state(&self, vdev_id: VdevId, state: State) {
        let mut states = self.roam_states.lock();
        let entry = &mut states[usize::from(vdev_id)];
        if entry.state != state {
            info!("vdev {}: {:?} -> {:?}", vdev_id, entry.state, state);
            entry.state = state;
        }
    }

    /// Like `change_substate` but leaves the substate alone.
    fn check_substate(&self, vdev_id: VdevId, to: Substate) -> Result<(), Error> {
        let from = self.roam_state(vdev_id).substate;
        check_transition(from, to).map_err(|e| {
            self.counters.invalid_transitions.fetch_add(1, Ordering::Relaxed);
            warn!("vdev {}: {}", vdev_id, e);
            e
        })
    }

    fn change_substate(&self, vdev_id: VdevId, to: Substate) -> Result<(), Error> {
        let mut states = self.roam_states.lock();
        let entry = &mut states[usize::from(vdev_id)];
        if let Err(e) = check_transition(entry.substate, to) {
            self.counters.invalid_transitions.fetch_add(1, Ordering::Relaxed);
            warn!("vdev {}: {}", vdev_id, e);
            return Err(e);
        }
        debug!("vdev {}: substate {:?} -> {:?}", vdev_id, entry.substate, to);
        entry.substate = to;
        Ok(())
    }

    /// Sets both state and substate without consulting the transition table.
    fn force_state(&self, vdev_id: VdevId, state: State, substate: Substate) {
        let mut states = self.roam_states.lock();
        let entry = &mut states[usize::from(vdev_id)];
        if entry.state != state || entry.substate != substate {
            info!(
                "vdev {}: {:?}/{:?} -> {:?}/{:?}",
                vdev_id, entry.state, entry.substate, state, substate
            );
        }
        *entry = RoamState { state, substate };
    }

    fn reset_to_idle(&self, vdev_id: VdevId) {
        self.force_state(vdev_id, State::Idle, Substate::None);
    }

    fn enter_joining(&self, handle: SessionHandle, trigger: OffloadTrigger) {
        self.set_state(handle.vdev_id(), State::Joining);
        let pause = self
            .with_session(handle, |s| !std::mem::replace(&mut s.offloads_paused, true))
            .unwrap_or(false);
        if pause {
            self.power.pause_traffic_dependent_offloads(handle.vdev_id(), trigger);
        }
    }

    fn resume_offloads(&self, handle: SessionHandle, trigger: OffloadTrigger) {
        let resume = self
            .with_session(handle, |s| std::mem::replace(&mut s.offloads_paused, false))
            .unwrap_or(false);
        if resume {
            self.power.resume_traffic_dependent_offloads(handle.vdev_id(), trigger);
        }
    }

    fn arm_roaming_timer(&self, handle: SessionHandle, roam_id: RoamId) {
        let event = TimedEvent::RoamingTimeout { session: handle, roam_id };
        let id = self.timer.lock().schedule_after(self.cfg.roaming_timeout(), event);
        if let Ok(Some(old)) = self.with_session(handle, |s| s.roaming_timer.replace(id)) {
            self.timer.lock().cancel_event(old);
        }
    }

    fn cancel_roaming_timer(&self, handle: SessionHandle) {
        if let Ok(Some(id)) = self.with_session(handle, |s| s.roaming_timer.take()) {
            self.timer.lock().cancel_event(id);
        }
    }

    fn arm_wait_for_key_timer(&self, handle: SessionHandle) {
        let event = TimedEvent::WaitForKeyTimeout { session: handle };
        let id = self.timer.lock().schedule_after(self.cfg.wait_for_key_timeout(), event);
        if let Ok(Some(old)) = self.with_session(handle, |s| s.wait_for_key_timer.replace(id)) {
            self.timer.lock().cancel_event(old);
        }
    }

    fn cancel_wait_for_key_timer(&self, handle: SessionHandle) {
        if let Ok(Some(id)) = self.with_session(handle, |s| s.wait_for_key_timer.take()) {
            self.timer.lock().cancel_event(id);
        }
    }

    fn cached_key_id(&self, handle: SessionHandle, auth_type: AuthType, bssid: &Bssid) -> Option<Pmkid> {
        self.with_session(handle, |s| match auth_type {
            AuthType::Open => None,
            AuthType::Wapi => s.bkid_cache.lookup(bssid),
            _ => s.pmkid_cache.lookup(bssid),
        })
        .ok()
        .flatten()
    }

    fn merge_country_votes(&self, bss_list: &[BssDescription]) {
        let mut channels = self.channels.lock();
        for country in bss_list.iter().filter_map(|bss| bss.country) {
            channels.merge_11d_vote(country);
        }
    }

    fn rank_candidates(
        &self,
        handle: SessionHandle,
        profile: &RoamProfile,
        bss_list: Vec<BssDescription>,
    ) -> Vec<BssDescription> {
        let current = self.with_session(handle, |s| s.connected_profile.clone()).ok().flatten();
        let channels = self.channels.lock();
        candidate::select_candidates(&self.cfg, &channels, profile, bss_list, current.as_ref())
    }
}

fn offload_trigger(reason: RoamReason) -> OffloadTrigger {
    match reason {
        RoamReason::Connect => OffloadTrigger::Connect,
        RoamReason::Reassoc | RoamReason::LostLink => OffloadTrigger::Roam,
    }
}
