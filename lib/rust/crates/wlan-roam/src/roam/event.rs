// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::{command::RoamId, session::SessionHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimedEvent {
    /// A roam command spent too long joining.
    RoamingTimeout { session: SessionHandle, roam_id: RoamId },
    /// No key was installed after association.
    WaitForKeyTimeout { session: SessionHandle },
}

impl TimedEvent {
    pub fn session(&self) -> SessionHandle {
        match self {
            TimedEvent::RoamingTimeout { session, .. } | TimedEvent::WaitForKeyTimeout { session } => {
                *session
            }
        }
    }
}
