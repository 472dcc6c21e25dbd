// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::queue::PriorityQueue;
use futures_util::task::noop_waker_ref;
use ichor_core::WaitError;
use std::task::{Context, Poll};

fn poll_once<F: Future>(fut: &mut Pin<Box<F>>) -> Poll<F::Output> {
    fut.as_mut().poll(&mut Context::from_waker(noop_waker_ref()))
}

#[test]
fn wait_on_set_event_completes_immediately() {
    let queue = PriorityQueue::new();
    let dm = queue.create_manager();
    let event = AsyncManualResetEvent::new(&dm);
    event.set();

    let mut wait = Box::pin(event.wait());
    assert_eq!(poll_once(&mut wait), Poll::Ready(Ok(())));
}

#[test]
fn wait_suspends_until_set() {
    let queue = PriorityQueue::new();
    let dm = queue.create_manager();
    let event = AsyncManualResetEvent::new(&dm);

    let mut wait = Box::pin(event.wait());
    assert_eq!(poll_once(&mut wait), Poll::Pending);

    event.set();
    assert_eq!(poll_once(&mut wait), Poll::Ready(Ok(())));
}

#[test]
fn reset_only_clears_the_gate() {
    let queue = PriorityQueue::new();
    let dm = queue.create_manager();
    let event = AsyncManualResetEvent::new(&dm);

    event.set();
    assert!(event.is_set());
    event.reset();
    assert!(!event.is_set());

    let mut wait = Box::pin(event.wait());
    assert_eq!(poll_once(&mut wait), Poll::Pending);
}

#[test]
fn shutdown_fails_pending_waiters() {
    let queue = PriorityQueue::new();
    let dm = queue.create_manager();
    let event = AsyncManualResetEvent::new(&dm);

    let mut wait = Box::pin(event.wait());
    assert_eq!(poll_once(&mut wait), Poll::Pending);

    dm.fail_pending_waits();
    assert_eq!(poll_once(&mut wait), Poll::Ready(Err(WaitError::Quitting)));
}

#[test]
fn value_event_hands_the_value_to_every_waiter() {
    let queue = PriorityQueue::new();
    let dm = queue.create_manager();
    let event: AsyncValueEvent<u32> = AsyncValueEvent::new(&dm);

    let mut first = Box::pin(event.wait());
    let mut second = Box::pin(event.wait());
    assert_eq!(poll_once(&mut first), Poll::Pending);
    assert_eq!(poll_once(&mut second), Poll::Pending);

    event.set(99);
    assert_eq!(poll_once(&mut first), Poll::Ready(Ok(99)));
    assert_eq!(poll_once(&mut second), Poll::Ready(Ok(99)));

    // Late waiters see the stored value until reset.
    let mut third = Box::pin(event.wait());
    assert_eq!(poll_once(&mut third), Poll::Ready(Ok(99)));
    event.reset();
    let mut fourth = Box::pin(event.wait());
    assert_eq!(poll_once(&mut fourth), Poll::Pending);
}

#[test]
fn value_event_fails_on_shutdown() {
    let queue = PriorityQueue::new();
    let dm = queue.create_manager();
    let event: AsyncValueEvent<String> = AsyncValueEvent::new(&dm);

    let mut wait = Box::pin(event.wait());
    assert_eq!(poll_once(&mut wait), Poll::Pending);

    dm.fail_pending_waits();
    assert_eq!(poll_once(&mut wait), Poll::Ready(Err(WaitError::Quitting)));
}
