// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        power::{OffloadTrigger, PowerOffload},
        profile::{AuthType, RoamProfile},
        roam::{ConnectRequest, InfoEvent, RoamStateMachine},
        timer::{TimeEntry, TimeStream},
        BssDescription, ChannelNumber, FwPayload, FwRequest, FwStatus, FwStream, InfoStream,
        RoamConfig, RoamId, SessionHandle, VdevId,
    },
    parking_lot::Mutex,
    std::sync::Arc,
};

pub fn fake_bss(n: u8, ssid: &[u8]) -> BssDescription {
    fake_bss_on(n, ssid, 6, -50)
}

pub fn fake_bss_on(n: u8, ssid: &[u8], channel: ChannelNumber, rssi_dbm: i8) -> BssDescription {
    BssDescription {
        bssid: [n, 0x11, 0x22, 0x33, 0x44, n],
        ssid: ssid.to_vec(),
        channel,
        is_dfs: false,
        rssi_dbm,
        country: None,
        beacon_period: 100,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffloadCall {
    Pause(VdevId, OffloadTrigger),
    Resume(VdevId, OffloadTrigger),
}

/// Records every offload call it receives.
#[derive(Default)]
pub struct FakePowerOffload {
    calls: Mutex<Vec<OffloadCall>>,
}

impl FakePowerOffload {
    pub fn calls(&self) -> Vec<OffloadCall> {
        self.calls.lock().clone()
    }
}

impl PowerOffload for FakePowerOffload {
    fn pause_traffic_dependent_offloads(&self, vdev_id: VdevId, trigger: OffloadTrigger) {
        self.calls.lock().push(OffloadCall::Pause(vdev_id, trigger));
    }

    fn resume_traffic_dependent_offloads(&self, vdev_id: VdevId, trigger: OffloadTrigger) {
        self.calls.lock().push(OffloadCall::Resume(vdev_id, trigger));
    }
}

pub struct TestHelper {
    pub machine: RoamStateMachine,
    pub fw: FwStream,
    pub info: InfoStream,
    pub time: TimeStream,
    pub power: Arc<FakePowerOffload>,
}

pub fn test_helper(cfg: RoamConfig) -> TestHelper {
    let power = Arc::new(FakePowerOffload::default());
    let (machine, fw, info, time) = RoamStateMachine::new(cfg, power.clone()).expect("valid config");
    TestHelper { machine, fw, info, time, power }
}

impl TestHelper {
    pub fn open(&self, vdev_id: VdevId) -> SessionHandle {
        self.machine.open_session(vdev_id, [2, 2, 2, 2, 2, vdev_id]).expect("open session")
    }

    pub fn next_fw(&mut self) -> FwRequest {
        self.fw.try_next().expect("no firmware request").expect("firmware stream closed")
    }

    pub fn expect_no_fw(&mut self) {
        if let Ok(req) = self.fw.try_next() {
            panic!("unexpected firmware request: {:?}", req);
        }
    }

    pub fn drain_info(&mut self) -> Vec<InfoEvent> {
        let mut events = vec![];
        while let Ok(Some(event)) = self.info.try_next() {
            events.push(event);
        }
        events
    }

    pub fn drain_timers(&mut self) -> Vec<TimeEntry> {
        let mut entries = vec![];
        while let Ok(Some(entry)) = self.time.try_next() {
            entries.push(entry);
        }
        entries
    }

    pub fn complete(&self, req: &FwRequest) {
        self.machine.on_command_result(req.txn_id(), FwStatus::Success, FwPayload::None);
    }

    pub fn fail(&self, req: &FwRequest, status_code: u16) {
        let status = FwStatus::Failure { status_code, reason_code: 0 };
        self.machine.on_command_result(req.txn_id(), status, FwPayload::None);
    }

    /// Connects to `fake_bss(n, b"foo")` over an open network, answering every firmware request
    /// with success.
    pub fn connect_open(&mut self, handle: SessionHandle, n: u8) -> RoamId {
        let profile = RoamProfile::new(b"foo".to_vec(), AuthType::Open);
        let req = ConnectRequest { profile, bss_list: vec![fake_bss(n, b"foo")] };
        let id = self.machine.request_connect(handle, req).expect("connect queued");
        for _ in 0..3 {
            let req = self.next_fw();
            match req {
                FwRequest::Join { .. }
                | FwRequest::Authenticate { .. }
                | FwRequest::ConfigureBss { .. } => self.complete(&req),
                other => panic!("unexpected firmware request while joining: {:?}", other),
            }
        }
        id
    }
}
