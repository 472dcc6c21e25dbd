// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-instance broadcast channel.
//!
//! Queues do not share service state; the only sanctioned cross-thread
//! coordination is copying an event into every attached queue. The
//! channel is fan-out only, there is no ordering guarantee between
//! queues.

use parking_lot::Mutex;

use ichor_core::{Event, Priority, QueueId, ServiceId, DEFAULT_EVENT_PRIORITY};

use crate::queue::Queue;

/// Binds several queues for event fan-out.
#[derive(Default)]
pub struct BroadcastChannel {
    queues: Mutex<Vec<Queue>>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, queue: &Queue) {
        let mut queues = self.queues.lock();
        if queues.iter().all(|q| q.id() != queue.id()) {
            queues.push(queue.clone());
        }
    }

    pub fn detach(&self, id: QueueId) {
        self.queues.lock().retain(|q| q.id() != id);
    }

    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Push a copy of `event` into every attached queue at the default
    /// priority. Returns the number of queues reached.
    pub fn broadcast_event<E: Event + Clone>(&self, origin: ServiceId, event: E) -> usize {
        self.broadcast_event_prioritised(origin, DEFAULT_EVENT_PRIORITY, event)
    }

    pub fn broadcast_event_prioritised<E: Event + Clone>(
        &self,
        origin: ServiceId,
        priority: Priority,
        event: E,
    ) -> usize {
        let queues: Vec<Queue> = self.queues.lock().clone();
        for queue in &queues {
            queue.push_event_prioritised(origin, priority, event.clone());
        }
        queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::PriorityQueue;
    use ichor_core::test_support::CountedEvent;

    #[test]
    fn attach_is_idempotent_and_detach_removes() {
        let a = PriorityQueue::new();
        let b = PriorityQueue::new();
        let channel = BroadcastChannel::new();

        channel.attach(&a.handle());
        channel.attach(&a.handle());
        channel.attach(&b.handle());
        assert_eq!(channel.queue_count(), 2);

        channel.detach(a.handle().id());
        assert_eq!(channel.queue_count(), 1);
    }

    #[test]
    fn broadcast_copies_into_every_queue() {
        let a = PriorityQueue::new();
        let b = PriorityQueue::new();
        let channel = BroadcastChannel::new();
        channel.attach(&a.handle());
        channel.attach(&b.handle());

        let reached = channel.broadcast_event(ServiceId::FRAMEWORK, CountedEvent::new(7));
        assert_eq!(reached, 2);
        assert_eq!(a.handle().len(), 1);
        assert_eq!(b.handle().len(), 1);
    }
}
