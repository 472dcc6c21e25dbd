// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Value-producing coroutine handles.
//!
//! [`Task`] is the awaitable half of [`DependencyManager::spawn`]: the
//! spawned future runs under the queue like everything else, and awaiting
//! the task suspends the awaiter until the value lands in the shared
//! slot. If the queue shuts down first, the await resolves with
//! [`WaitError::Quitting`].
//!
//! [`DependencyManager::spawn`]: crate::dm::DependencyManager::spawn

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use ichor_core::WaitError;

use crate::coroutine::reset_event::FailableWait;

pub(crate) struct TaskSlot<T> {
    value: Option<T>,
    failed: Option<WaitError>,
    waker: Option<Waker>,
}

impl<T> TaskSlot<T> {
    pub(crate) fn complete(slot: &Rc<RefCell<Self>>, value: T) {
        let mut state = slot.borrow_mut();
        state.value = Some(value);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }
}

impl<T> FailableWait for RefCell<TaskSlot<T>> {
    fn fail(&self, error: WaitError) {
        let mut state = self.borrow_mut();
        if state.value.is_none() {
            state.failed = Some(error);
        }
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }
}

/// Handle to a spawned value-producing coroutine.
pub struct Task<T> {
    slot: Rc<RefCell<TaskSlot<T>>>,
}

impl<T> Task<T> {
    pub(crate) fn new() -> (Self, Rc<RefCell<TaskSlot<T>>>) {
        let slot = Rc::new(RefCell::new(TaskSlot { value: None, failed: None, waker: None }));
        (Task { slot: slot.clone() }, slot)
    }

    /// True once the spawned future has produced its value.
    pub fn is_done(&self) -> bool {
        self.slot.borrow().value.is_some()
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.borrow_mut();
        if let Some(value) = state.value.take() {
            return Poll::Ready(Ok(value));
        }
        if let Some(error) = state.failed {
            return Poll::Ready(Err(error));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
