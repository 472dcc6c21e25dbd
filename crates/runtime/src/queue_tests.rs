// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ichor_core::test_support::CountedEvent;
use ichor_core::Priority;
use yare::parameterized;

fn drain_ids(queue: &PriorityQueue) -> Vec<u64> {
    let mut out = Vec::new();
    let mut state = queue.core.state.lock();
    while let Some(envelope) = state.backing.pop() {
        out.push(envelope.meta.id.as_u64());
    }
    out
}

fn drain_seqs(queue: &PriorityQueue) -> Vec<u64> {
    let mut out = Vec::new();
    let mut state = queue.core.state.lock();
    while let Some(envelope) = state.backing.pop() {
        if let EventPayload::User { payload, .. } = envelope.payload {
            if let Ok(event) = payload.downcast::<CountedEvent>() {
                out.push(event.seq);
            }
        }
    }
    out
}

#[parameterized(heap = { false }, ordered = { true })]
fn equal_priority_pops_in_fifo_order(ordered: bool) {
    let queue = PriorityQueue::with_config(QueueConfig::default().ordered(ordered));
    let handle = queue.handle();
    for seq in 0..5 {
        handle.push_event(ServiceId::FRAMEWORK, CountedEvent::new(seq));
    }
    assert_eq!(drain_seqs(&queue), vec![0, 1, 2, 3, 4]);
}

#[parameterized(heap = { false }, ordered = { true })]
fn smaller_priority_pops_first(ordered: bool) {
    let queue = PriorityQueue::with_config(QueueConfig::default().ordered(ordered));
    let handle = queue.handle();
    handle.push_event_prioritised(ServiceId::FRAMEWORK, Priority::new(500), CountedEvent::new(0));
    handle.push_event_prioritised(ServiceId::FRAMEWORK, Priority::new(10), CountedEvent::new(1));
    handle.push_event_prioritised(ServiceId::FRAMEWORK, Priority::new(100), CountedEvent::new(2));
    assert_eq!(drain_seqs(&queue), vec![1, 2, 0]);
}

#[test]
fn ordered_backing_obeys_the_same_contract() {
    let queue = PriorityQueue::with_config(QueueConfig::default().ordered(true));
    let handle = queue.handle();
    handle.push_event_prioritised(ServiceId::FRAMEWORK, Priority::new(500), CountedEvent::new(0));
    handle.push_event_prioritised(ServiceId::FRAMEWORK, Priority::new(10), CountedEvent::new(1));
    handle.push_event(ServiceId::FRAMEWORK, CountedEvent::new(2));
    handle.push_event_prioritised(ServiceId::FRAMEWORK, Priority::new(10), CountedEvent::new(3));
    assert_eq!(drain_seqs(&queue), vec![1, 3, 0, 2]);
}

#[test]
fn event_ids_strictly_increase() {
    let queue = PriorityQueue::new();
    let handle = queue.handle();
    let a = handle.push_event(ServiceId::FRAMEWORK, CountedEvent::new(0));
    let b = handle.push_event(ServiceId::FRAMEWORK, CountedEvent::new(1));
    let c = handle.push_quit(ServiceId::FRAMEWORK);
    assert!(a < b && b < c);
    assert_eq!(drain_ids(&queue).len(), 3);
}

#[test]
fn len_counts_the_event_being_processed() {
    let queue = PriorityQueue::new();
    let handle = queue.handle();
    assert!(handle.is_empty());

    handle.push_event(ServiceId::FRAMEWORK, CountedEvent::new(0));
    assert_eq!(handle.len(), 1);

    // Simulate the loop holding a popped event.
    queue.core.state.lock().backing.pop();
    queue.core.processing.store(true, Ordering::Release);
    assert_eq!(handle.len(), 1);
    assert!(!handle.is_empty());

    queue.core.processing.store(false, Ordering::Release);
    assert!(handle.is_empty());
}

#[test]
fn first_quit_arms_the_drain_deadline() {
    let queue = PriorityQueue::with_config(
        QueueConfig::default().quit_timeout(Duration::from_millis(250)),
    );
    let handle = queue.handle();
    assert!(queue.core.state.lock().quit_deadline.is_none());

    handle.push_quit(ServiceId::FRAMEWORK);
    let first = queue.core.state.lock().quit_deadline;
    assert!(first.is_some());

    // A second quit does not move the deadline.
    handle.push_quit(ServiceId::FRAMEWORK);
    assert_eq!(queue.core.state.lock().quit_deadline, first);
}

#[test]
fn start_without_manager_errors() {
    let queue = PriorityQueue::new();
    assert!(matches!(queue.start(false), Err(ichor_core::QueueError::NoManager)));
}
