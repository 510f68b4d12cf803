// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{roam::state::Substate, session::JoinStatus, VdevId},
    thiserror::Error,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutKind {
    Roaming,
    WaitForKey,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    #[error("invalid session (vdev {0})")]
    InvalidSession(usize),
    #[error("session for vdev {0} is already active")]
    AlreadyActive(VdevId),
    #[error("illegal substate transition {from:?} -> {to:?}")]
    InvalidTransition { from: Substate, to: Substate },
    #[error("command queue full; capacity {capacity}")]
    CommandQueueFull { capacity: usize },
    #[error("all BSS candidates failed to join")]
    CandidateExhausted,
    #[error("firmware reported failure: {0:?}")]
    FirmwareReportedFailure(JoinStatus),
    #[error("{0:?} timer fired")]
    Timeout(TimeoutKind),
}

impl Error {
    /// Whether an entry point returning this error left the session state untouched.
    /// Firmware failures and timeouts are only reported asynchronously, after the state moved.
    pub fn is_state_preserving(&self) -> bool {
        match self {
            Error::InvalidSession(_)
            | Error::AlreadyActive(_)
            | Error::InvalidTransition { .. }
            | Error::CommandQueueFull { .. }
            | Error::CandidateExhausted => true,
            Error::FirmwareReportedFailure(_) | Error::Timeout(_) => false,
        }
    }
}
