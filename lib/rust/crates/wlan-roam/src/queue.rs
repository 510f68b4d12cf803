// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        command::{Command, CommandInfo, CommandType, RoamId},
        error::Error,
        VdevId,
    },
    log::debug,
    parking_lot::Mutex,
    std::collections::VecDeque,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListKind {
    Pending,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Promotion {
    /// Nothing is pending.
    Empty,
    /// Every pending command belongs to a vdev that already has an active command. Carries the
    /// vdev of the pending head.
    Blocked(VdevId),
    Promoted(CommandInfo),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurgeScope {
    PendingOnly,
    ActiveAndPending,
    /// Scan commands, active or pending.
    ScanOnly,
    /// Roam commands, active or pending.
    RoamOnly,
    /// Commands the upper layer awaits a connect result from: roams and connect scans.
    ConnectAttempts,
}

impl PurgeScope {
    fn matches(&self, cmd: &Command) -> bool {
        match self {
            PurgeScope::PendingOnly | PurgeScope::ActiveAndPending => true,
            PurgeScope::ScanOnly => cmd.command_type() == CommandType::Scan,
            PurgeScope::RoamOnly => cmd.command_type() == CommandType::Roam,
            PurgeScope::ConnectAttempts => cmd.is_connect_attempt(),
        }
    }

    fn includes_active(&self) -> bool {
        *self != PurgeScope::PendingOnly
    }
}

/// Radio-wide pending and active command lists. At most one command per vdev is active.
///
/// Each list has its own lock. When both are needed the pending list is locked first.
pub struct CommandQueue {
    capacity: usize,
    pending: Mutex<VecDeque<Command>>,
    active: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        CommandQueue {
            capacity,
            pending: Mutex::new(VecDeque::new()),
            active: Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn with_pending<R>(&self, f: impl FnOnce(&mut VecDeque<Command>) -> R) -> R {
        f(&mut self.pending.lock())
    }

    pub fn with_active<R>(&self, f: impl FnOnce(&mut VecDeque<Command>) -> R) -> R {
        f(&mut self.active.lock())
    }

    /// Copy of the active command `id`. The original stays in the active list, so its vdev keeps
    /// counting as busy while the copy is worked on.
    pub fn active_command(&self, id: RoamId) -> Option<Command> {
        self.with_active(|active| active.iter().find(|cmd| cmd.id == id).cloned())
    }

    /// Writes `cmd` back over the active command with the same id. Returns false if that
    /// command was purged meanwhile.
    pub fn update_active(&self, cmd: Command) -> bool {
        self.with_active(|active| match active.iter_mut().find(|c| c.id == cmd.id) {
            Some(slot) => {
                *slot = cmd;
                true
            }
            None => false,
        })
    }

    pub fn enqueue_pending(&self, cmd: Command) -> Result<(), Error> {
        self.enqueue(cmd, false)
    }

    pub fn enqueue_pending_head(&self, cmd: Command) -> Result<(), Error> {
        self.enqueue(cmd, true)
    }

    fn enqueue(&self, cmd: Command, head: bool) -> Result<(), Error> {
        let mut pending = self.pending.lock();
        let active_len = self.active.lock().len();
        if pending.len() + active_len >= self.capacity {
            return Err(Error::CommandQueueFull { capacity: self.capacity });
        }
        debug!("queueing {:?} {:?} for vdev {} (head: {})", cmd.command_type(), cmd.id, cmd.vdev_id, head);
        if head {
            pending.push_front(cmd);
        } else {
            pending.push_back(cmd);
        }
        Ok(())
    }

    /// Moves the first pending command whose vdev has no active command to the active list.
    /// Commands of one vdev keep their relative order.
    pub fn promote_head_to_active(&self) -> Promotion {
        let mut pending = self.pending.lock();
        let mut active = self.active.lock();
        let head_vdev = match pending.front() {
            Some(cmd) => cmd.vdev_id,
            None => return Promotion::Empty,
        };
        let runnable = pending
            .iter()
            .position(|cmd| !active.iter().any(|running| running.vdev_id == cmd.vdev_id));
        match runnable.and_then(|idx| pending.remove(idx)) {
            Some(cmd) => {
                let info = cmd.info();
                debug!("activating {:?} {:?} for vdev {}", info.kind, info.id, info.vdev_id);
                active.push_back(cmd);
                Promotion::Promoted(info)
            }
            None => Promotion::Blocked(head_vdev),
        }
    }

    pub fn remove_active(&self, id: RoamId) -> Option<Command> {
        self.with_active(|active| {
            let idx = active.iter().position(|cmd| cmd.id == id)?;
            active.remove(idx)
        })
    }

    pub fn peek_head(&self, list: ListKind) -> Option<CommandInfo> {
        match list {
            ListKind::Pending => self.with_pending(|l| l.front().map(Command::info)),
            ListKind::Active => self.with_active(|l| l.front().map(Command::info)),
        }
    }

    pub fn count(&self, list: ListKind) -> usize {
        match list {
            ListKind::Pending => self.with_pending(|l| l.len()),
            ListKind::Active => self.with_active(|l| l.len()),
        }
    }

    pub fn count_for_vdev(&self, list: ListKind, vdev_id: VdevId) -> usize {
        let count = |l: &mut VecDeque<Command>| l.iter().filter(|c| c.vdev_id == vdev_id).count();
        match list {
            ListKind::Pending => self.with_pending(count),
            ListKind::Active => self.with_active(count),
        }
    }

    pub fn active_for_vdev(&self, vdev_id: VdevId) -> Option<CommandInfo> {
        self.with_active(|active| {
            active.iter().find(|cmd| cmd.vdev_id == vdev_id).map(Command::info)
        })
    }

    /// Removes the commands of `vdev_id` selected by `scope` and hands them back, active ones
    /// first. Purging nothing is not an error.
    pub fn purge_for_vdev(&self, vdev_id: VdevId, scope: PurgeScope) -> Vec<Command> {
        let mut pending = self.pending.lock();
        let mut active = self.active.lock();
        let selected = |cmd: &Command| cmd.vdev_id == vdev_id && scope.matches(cmd);
        let mut purged = vec![];
        if scope.includes_active() {
            purged.extend(drain_where(&mut active, &selected));
        }
        purged.extend(drain_where(&mut pending, &selected));
        if !purged.is_empty() {
            debug!("purged {} command(s) of vdev {} ({:?})", purged.len(), vdev_id, scope);
        }
        purged
    }

    pub fn purge_all(&self) -> Vec<Command> {
        let mut pending = self.pending.lock();
        let mut active = self.active.lock();
        active.drain(..).chain(pending.drain(..)).collect()
    }
}

fn drain_where(list: &mut VecDeque<Command>, pred: &impl Fn(&Command) -> bool) -> Vec<Command> {
    let (taken, kept): (VecDeque<_>, VecDeque<_>) = list.drain(..).partition(|cmd| pred(cmd));
    *list = kept;
    taken.into_iter().collect()
}
