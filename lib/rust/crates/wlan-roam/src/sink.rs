// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    futures::channel::mpsc,
    log::{debug, warn},
    std::{
        fmt,
        sync::atomic::{AtomicU64, Ordering},
    },
};

/// Sending half of one of the machine's outbound streams.
///
/// Sends never block. Once the receiver is gone the machine keeps running; messages are dropped
/// and counted, and only the first drop is logged as a warning.
pub struct UnboundedSink<T> {
    name: &'static str,
    sender: mpsc::UnboundedSender<T>,
    dropped: AtomicU64,
}

impl<T: fmt::Debug> UnboundedSink<T> {
    pub fn new(name: &'static str, sender: mpsc::UnboundedSender<T>) -> Self {
        UnboundedSink { name, sender, dropped: AtomicU64::new(0) }
    }

    pub fn send(&self, msg: T) {
        if let Err(e) = self.sender.unbounded_send(msg) {
            let msg = e.into_inner();
            if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!("{} receiver is gone; dropping {:?} and everything after it", self.name, msg);
            } else {
                debug!("{} receiver is gone; dropping {:?}", self.name, msg);
            }
        }
    }

    /// Messages lost because the receiver was dropped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for UnboundedSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnboundedSink")
            .field("name", &self.name)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

pub type FwSink = UnboundedSink<crate::FwRequest>;
pub type InfoSink = UnboundedSink<crate::InfoEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_while_receiver_lives() {
        let (sender, mut receiver) = mpsc::unbounded();
        let sink = UnboundedSink::new("test", sender);
        sink.send(1u32);
        sink.send(2u32);
        assert_eq!(receiver.try_next().expect("message"), Some(1));
        assert_eq!(receiver.try_next().expect("message"), Some(2));
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn counts_messages_to_a_dropped_receiver() {
        let (sender, receiver) = mpsc::unbounded();
        let sink = UnboundedSink::new("test", sender);
        sink.send(1u32);
        std::mem::drop(receiver);
        sink.send(2u32);
        sink.send(3u32);
        assert_eq!(sink.dropped(), 2);
    }
}
