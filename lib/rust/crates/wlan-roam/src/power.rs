// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::VdevId;

/// What caused offloads to be paused or resumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffloadTrigger {
    Connect,
    Roam,
    RoamSync,
    Disconnect,
}

/// Power-management collaborator. Traffic-dependent offloads (ARP/NS offload, packet filters)
/// are paused while a session is joining and resumed when it leaves the joining state.
pub trait PowerOffload: Send + Sync {
    fn pause_traffic_dependent_offloads(&self, vdev_id: VdevId, trigger: OffloadTrigger);
    fn resume_traffic_dependent_offloads(&self, vdev_id: VdevId, trigger: OffloadTrigger);
}
