// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    futures::channel::mpsc,
    std::{
        collections::HashMap,
        time::{Duration, Instant},
    },
};

#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone)]
pub struct EventId(u64);

/// A scheduled deadline. The executor driving the state machine waits until `deadline` and
/// then hands `id` back through `RoamStateMachine::on_timeout`.
#[derive(Debug, PartialEq, Eq)]
pub struct TimeEntry {
    pub deadline: Instant,
    pub id: EventId,
}

pub type TimeStream = mpsc::UnboundedReceiver<TimeEntry>;

/// Single-shot timers. An event fires at most once and never after it has been canceled.
pub struct Timer<E> {
    sender: mpsc::UnboundedSender<TimeEntry>,
    events: HashMap<EventId, E>,
    next_id: u64,
}

pub fn create_timer<E>() -> (Timer<E>, TimeStream) {
    let (sender, receiver) = mpsc::unbounded();
    (Timer { sender, events: HashMap::default(), next_id: 0 }, receiver)
}

impl<E> Timer<E> {
    pub fn schedule_after(&mut self, duration: Duration, event: E) -> EventId {
        self.schedule_at(Instant::now() + duration, event)
    }

    pub fn schedule_at(&mut self, deadline: Instant, event: E) -> EventId {
        self.next_id += 1;
        let id = EventId(self.next_id);
        self.events.insert(id, event);
        // A closed receiver only means nobody will ever fire this timer.
        let _ = self.sender.unbounded_send(TimeEntry { deadline, id });
        id
    }

    /// Returns the event if it is still armed and disarms it.
    pub fn triggered(&mut self, id: &EventId) -> Option<E> {
        self.events.remove(id)
    }

    pub fn cancel_event(&mut self, id: EventId) {
        self.events.remove(&id);
    }

    pub fn cancel_all(&mut self) {
        self.events.clear();
    }

    pub fn is_armed(&self, id: &EventId) -> bool {
        self.events.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(PartialEq, Eq, Debug)]
    struct FooEvent(u8);

    #[test]
    fn schedule_cancel_event() {
        let (mut timer, mut time_stream) = create_timer::<FooEvent>();

        // Verify event triggers no more than once.
        let event_id = timer.schedule_after(Duration::from_millis(5), FooEvent(8));
        let entry = time_stream.try_next().unwrap().expect("expected a scheduled entry");
        assert_eq!(entry.id, event_id);
        assert_eq!(timer.triggered(&event_id), Some(FooEvent(8)));
        assert_eq!(timer.triggered(&event_id), None);

        // Verify event does not trigger if it was canceled.
        let event_id = timer.schedule_after(Duration::from_millis(5), FooEvent(9));
        timer.cancel_event(event_id);
        assert_eq!(timer.triggered(&event_id), None);

        // Verify multiple events can be scheduled and canceled.
        let event_id_1 = timer.schedule_after(Duration::from_millis(5), FooEvent(8));
        let event_id_2 = timer.schedule_after(Duration::from_millis(5), FooEvent(9));
        let event_id_3 = timer.schedule_after(Duration::from_millis(5), FooEvent(10));
        timer.cancel_event(event_id_2);
        assert_eq!(timer.triggered(&event_id_2), None);
        assert_eq!(timer.triggered(&event_id_3), Some(FooEvent(10)));
        assert_eq!(timer.triggered(&event_id_1), Some(FooEvent(8)));
    }

    #[test]
    fn cancel_all() {
        let (mut timer, _time_stream) = create_timer();
        let event_id_1 = timer.schedule_after(Duration::from_millis(5), 8);
        let event_id_2 = timer.schedule_after(Duration::from_millis(5), 9);
        timer.cancel_all();
        assert!(!timer.is_armed(&event_id_1));
        assert_eq!(timer.triggered(&event_id_1), None);
        assert_eq!(timer.triggered(&event_id_2), None);
    }

    #[test]
    fn deadline_follows_duration() {
        let (mut timer, mut time_stream) = create_timer();
        let before = Instant::now();
        timer.schedule_after(Duration::from_secs(3), ());
        let entry = time_stream.try_next().unwrap().expect("expected a scheduled entry");
        assert!(entry.deadline >= before + Duration::from_secs(3));
    }
}
