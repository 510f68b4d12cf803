// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        profile::{KeyDescriptor, RoamProfile},
        roam::{DisconnectReason, LinkLossKind},
        BssDescription, Bssid, ChannelNumber, MacAddr, Ssid, VdevId,
    },
    std::sync::atomic::{AtomicU32, Ordering},
};

/// Identifies a queued command. A connect keeps its id across the scan it may start with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RoamId(pub u32);

/// Identifies one firmware request. Results are matched against the active command by this id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxnId(pub u32);

/// Wrapping id counter. Zero is never handed out.
#[derive(Debug)]
pub struct IdGenerator(AtomicU32);

impl IdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(next: u32) -> Self {
        IdGenerator(AtomicU32::new(next))
    }

    pub fn next(&self) -> u32 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoamReason {
    /// Upper layer asked for a connection.
    Connect,
    /// Move to another BSS of the same ESS without dropping the association first.
    Reassoc,
    /// The current link was lost and the stored profile is joined again.
    LostLink,
}

/// Ranked BSS candidates of one roam command, consumed head to tail.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateList {
    entries: Vec<BssDescription>,
    cursor: usize,
    last_failed: Option<Bssid>,
}

impl CandidateList {
    pub fn new(entries: Vec<BssDescription>) -> Self {
        CandidateList { entries, cursor: 0, last_failed: None }
    }

    pub fn current(&self) -> Option<&BssDescription> {
        self.entries.get(self.cursor)
    }

    /// Records the current candidate as failed and moves on to the next one.
    pub fn mark_current_failed(&mut self) {
        if let Some(bssid) = self.current().map(|bss| bss.bssid) {
            self.last_failed = Some(bssid);
            self.cursor += 1;
        }
    }

    pub fn last_failed(&self) -> Option<Bssid> {
        self.last_failed
    }

    pub fn remaining(&self) -> usize {
        self.entries.len().saturating_sub(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn entries(&self) -> &[BssDescription] {
        &self.entries[..]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoamCommand {
    pub reason: RoamReason,
    pub profile: Box<RoamProfile>,
    pub candidates: CandidateList,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScanPurpose {
    Discovery,
    /// Results feed candidate selection for this profile.
    Connect(Box<RoamProfile>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScanCommand {
    pub ssid: Option<Ssid>,
    pub purpose: ScanPurpose,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetKeyCommand {
    pub key: KeyDescriptor,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WmStatusChange {
    pub kind: LinkLossKind,
    pub reason_code: u16,
    pub peer: Bssid,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisconnectCommand {
    pub reason: DisconnectReason,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommandKind {
    Roam(RoamCommand),
    Scan(ScanCommand),
    SetKey(SetKeyCommand),
    WmStatusChange(WmStatusChange),
    Disconnect(DisconnectCommand),
    StartBss { ssid: Ssid, channel: ChannelNumber },
    StopBss,
    DeleteStationForSession { self_addr: MacAddr },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandType {
    Roam,
    Scan,
    SetKey,
    WmStatusChange,
    Disconnect,
    StartBss,
    StopBss,
    DeleteStation,
}

/// Copyable summary of a queued command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandInfo {
    pub id: RoamId,
    pub vdev_id: VdevId,
    pub kind: CommandType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub id: RoamId,
    pub vdev_id: VdevId,
    pub kind: CommandKind,
    /// Firmware request this command waits on while active.
    pub outstanding: Option<TxnId>,
}

impl Command {
    pub fn new(id: RoamId, vdev_id: VdevId, kind: CommandKind) -> Self {
        Command { id, vdev_id, kind, outstanding: None }
    }

    pub fn command_type(&self) -> CommandType {
        match &self.kind {
            CommandKind::Roam(_) => CommandType::Roam,
            CommandKind::Scan(_) => CommandType::Scan,
            CommandKind::SetKey(_) => CommandType::SetKey,
            CommandKind::WmStatusChange(_) => CommandType::WmStatusChange,
            CommandKind::Disconnect(_) => CommandType::Disconnect,
            CommandKind::StartBss { .. } => CommandType::StartBss,
            CommandKind::StopBss => CommandType::StopBss,
            CommandKind::DeleteStationForSession { .. } => CommandType::DeleteStation,
        }
    }

    pub fn info(&self) -> CommandInfo {
        CommandInfo { id: self.id, vdev_id: self.vdev_id, kind: self.command_type() }
    }

    /// Whether the upper layer is waiting for a `ConnectFinished` from this command.
    pub fn is_connect_attempt(&self) -> bool {
        match &self.kind {
            CommandKind::Roam(_) => true,
            CommandKind::Scan(ScanCommand { purpose: ScanPurpose::Connect(_), .. }) => true,
            _ => false,
        }
    }

    /// Profile the command tries to connect with, if any.
    pub fn roam_profile(&self) -> Option<&RoamProfile> {
        match &self.kind {
            CommandKind::Roam(roam) => Some(&roam.profile),
            CommandKind::Scan(ScanCommand { purpose: ScanPurpose::Connect(profile), .. }) => {
                Some(profile)
            }
            _ => None,
        }
    }
}
