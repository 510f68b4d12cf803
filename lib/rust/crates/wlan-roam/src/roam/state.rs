// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Stop,
    Idle,
    Joining,
    Joined,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Substate {
    None,
    StartBssReq,
    JoinReq,
    ReassocReq,
    DisassocReq,
    StopBssReq,
    DisconnectContinueRoaming,
    AuthReq,
    Config,
    DeauthReq,
    DisassocNothingToJoin,
    DisassocReassocFailure,
    DisassocForced,
    WaitForKey,
    DisassocHandoff,
    JoinedNoTraffic,
    JoinedNonRealtimeTraffic,
    JoinedRealtimeTraffic,
    DisassocStaHasLeft,
}

pub const ALL_SUBSTATES: [Substate; 19] = [
    Substate::None,
    Substate::StartBssReq,
    Substate::JoinReq,
    Substate::ReassocReq,
    Substate::DisassocReq,
    Substate::StopBssReq,
    Substate::DisconnectContinueRoaming,
    Substate::AuthReq,
    Substate::Config,
    Substate::DeauthReq,
    Substate::DisassocNothingToJoin,
    Substate::DisassocReassocFailure,
    Substate::DisassocForced,
    Substate::WaitForKey,
    Substate::DisassocHandoff,
    Substate::JoinedNoTraffic,
    Substate::JoinedNonRealtimeTraffic,
    Substate::JoinedRealtimeTraffic,
    Substate::DisassocStaHasLeft,
];

/// Coarse state and substate of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoamState {
    pub state: State,
    pub substate: Substate,
}

impl Default for RoamState {
    fn default() -> Self {
        RoamState { state: State::Stop, substate: Substate::None }
    }
}

/// One of the three traffic-class substates of a joined link.
pub fn is_joined_substate(s: Substate) -> bool {
    match s {
        Substate::JoinedNoTraffic
        | Substate::JoinedNonRealtimeTraffic
        | Substate::JoinedRealtimeTraffic => true,
        _ => false,
    }
}

/// An 802.11 join handshake step is outstanding.
pub fn is_join_in_progress(s: Substate) -> bool {
    match s {
        Substate::JoinReq | Substate::AuthReq | Substate::Config | Substate::ReassocReq => true,
        _ => false,
    }
}

/// A locally requested disassociation or deauthentication is outstanding.
pub fn is_disconnect_requested(s: Substate) -> bool {
    match s {
        Substate::DisassocReq
        | Substate::DeauthReq
        | Substate::DisassocForced
        | Substate::DisassocHandoff => true,
        _ => false,
    }
}

/// The link is already gone and the session is on its way back to idle or roaming.
pub fn is_link_down(s: Substate) -> bool {
    match s {
        Substate::DisassocNothingToJoin
        | Substate::DisassocReassocFailure
        | Substate::DisassocStaHasLeft
        | Substate::DisconnectContinueRoaming => true,
        _ => false,
    }
}

pub fn is_legal_transition(from: Substate, to: Substate) -> bool {
    use self::Substate as S;
    let joined = is_joined_substate(from);
    match to {
        S::None => true,
        S::StartBssReq => from == S::None,
        S::JoinReq => match from {
            S::None | S::JoinReq | S::AuthReq | S::Config | S::DisconnectContinueRoaming => true,
            _ => false,
        },
        S::AuthReq => from == S::JoinReq,
        S::Config => from == S::AuthReq,
        S::ReassocReq => joined,
        S::WaitForKey => from == S::Config || from == S::ReassocReq,
        S::JoinedNoTraffic => match from {
            S::StartBssReq
            | S::Config
            | S::WaitForKey
            | S::ReassocReq
            | S::JoinedNonRealtimeTraffic
            | S::JoinedRealtimeTraffic => true,
            _ => false,
        },
        S::JoinedNonRealtimeTraffic => {
            from == S::JoinedNoTraffic || from == S::JoinedRealtimeTraffic
        }
        S::JoinedRealtimeTraffic => {
            from == S::JoinedNoTraffic || from == S::JoinedNonRealtimeTraffic
        }
        S::DisassocReq | S::DeauthReq | S::DisassocForced => {
            joined
                || match from {
                    S::None | S::JoinReq | S::AuthReq | S::Config | S::WaitForKey | S::ReassocReq => {
                        true
                    }
                    _ => false,
                }
        }
        S::DisassocHandoff => joined || from == S::WaitForKey,
        S::StopBssReq => joined || from == S::StartBssReq,
        S::DisassocNothingToJoin => match from {
            S::JoinReq
            | S::AuthReq
            | S::Config
            | S::WaitForKey
            | S::DisassocReq
            | S::DeauthReq
            | S::DisassocForced
            | S::DisassocHandoff => true,
            _ => false,
        },
        S::DisassocReassocFailure => match from {
            S::ReassocReq
            | S::DisassocReq
            | S::DeauthReq
            | S::DisassocForced
            | S::DisassocHandoff => true,
            _ => false,
        },
        S::DisassocStaHasLeft => {
            joined
                || match from {
                    S::WaitForKey
                    | S::DisassocReq
                    | S::DeauthReq
                    | S::DisassocForced
                    | S::DisassocHandoff => true,
                    _ => false,
                }
        }
        S::DisconnectContinueRoaming => match from {
            S::DisassocNothingToJoin
            | S::DisassocReassocFailure
            | S::DisassocStaHasLeft
            | S::DisassocHandoff => true,
            _ => false,
        },
    }
}

pub fn check_transition(from: Substate, to: Substate) -> Result<(), Error> {
    if is_legal_transition(from, to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}
