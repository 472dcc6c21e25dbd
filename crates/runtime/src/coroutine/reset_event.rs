// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manual-reset events for coroutines on one queue.
//!
//! [`AsyncManualResetEvent`] suspends waiters until `set()`;
//! [`AsyncValueEvent`] additionally carries a value every waiter
//! receives. Both are single-thread primitives: they live and are
//! awaited on the queue's own thread. When the queue drains for
//! shutdown, pending waiters resolve with [`WaitError::Quitting`]
//! instead of hanging.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use ichor_core::WaitError;

use crate::dm::DependencyManager;

/// Shutdown hook shared by all waitable primitives; the dependency
/// manager keeps a weak list and fails whatever is still registered
/// when the loop exits.
pub(crate) trait FailableWait {
    fn fail(&self, error: WaitError);
}

struct ResetState {
    set: bool,
    failed: Option<WaitError>,
    wakers: Vec<Waker>,
}

impl ResetState {
    fn wake_all(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }
}

impl FailableWait for RefCell<ResetState> {
    fn fail(&self, error: WaitError) {
        let mut state = self.borrow_mut();
        state.failed = Some(error);
        state.wake_all();
    }
}

/// A set/reset gate for coroutines.
///
/// Waiting while set completes immediately; otherwise the waiter parks
/// until `set()`. `reset()` only clears the gate, it never unparks or
/// drops waiters.
#[derive(Clone)]
pub struct AsyncManualResetEvent {
    state: Rc<RefCell<ResetState>>,
}

impl AsyncManualResetEvent {
    pub fn new(dm: &DependencyManager) -> Self {
        let state = Rc::new(RefCell::new(ResetState { set: false, failed: None, wakers: Vec::new() }));
        let state_dyn: Rc<dyn FailableWait> = state.clone();
        dm.register_wait_primitive(Rc::downgrade(&state_dyn));
        AsyncManualResetEvent { state }
    }

    pub fn is_set(&self) -> bool {
        self.state.borrow().set
    }

    /// Set the gate and resume every pending waiter.
    pub fn set(&self) {
        let mut state = self.state.borrow_mut();
        if !state.set {
            state.set = true;
            state.wake_all();
        }
    }

    /// Clear the gate. Subsequent waiters will suspend again.
    pub fn reset(&self) {
        self.state.borrow_mut().set = false;
    }

    /// Wait until set. Resolves `Err(WaitError::Quitting)` when the
    /// queue shuts down first.
    pub fn wait(&self) -> ResetWait {
        ResetWait { state: self.state.clone() }
    }
}

pub struct ResetWait {
    state: Rc<RefCell<ResetState>>,
}

impl Future for ResetWait {
    type Output = Result<(), WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.failed {
            return Poll::Ready(Err(error));
        }
        if state.set {
            return Poll::Ready(Ok(()));
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

struct ValueState<T> {
    value: Option<T>,
    failed: Option<WaitError>,
    wakers: Vec<Waker>,
}

impl<T> ValueState<T> {
    fn wake_all(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }
}

impl<T> FailableWait for RefCell<ValueState<T>> {
    fn fail(&self, error: WaitError) {
        let mut state = self.borrow_mut();
        state.failed = Some(error);
        state.wake_all();
    }
}

/// A manual-reset event that carries a value.
///
/// `set(v)` stores the value; every waiter (pending or future) receives
/// a clone until `reset()`.
#[derive(Clone)]
pub struct AsyncValueEvent<T> {
    state: Rc<RefCell<ValueState<T>>>,
}

impl<T: Clone + 'static> AsyncValueEvent<T> {
    pub fn new(dm: &DependencyManager) -> Self {
        let state = Rc::new(RefCell::new(ValueState { value: None, failed: None, wakers: Vec::new() }));
        let state_dyn: Rc<dyn FailableWait> = state.clone();
        dm.register_wait_primitive(Rc::downgrade(&state_dyn));
        AsyncValueEvent { state }
    }

    pub fn is_set(&self) -> bool {
        self.state.borrow().value.is_some()
    }

    pub fn set(&self, value: T) {
        let mut state = self.state.borrow_mut();
        state.value = Some(value);
        state.wake_all();
    }

    pub fn reset(&self) {
        self.state.borrow_mut().value = None;
    }

    /// Wait for a value. Resolves `Err(WaitError::Quitting)` when the
    /// queue shuts down first.
    pub fn wait(&self) -> ValueWait<T> {
        ValueWait { state: self.state.clone() }
    }
}

pub struct ValueWait<T> {
    state: Rc<RefCell<ValueState<T>>>,
}

impl<T: Clone> Future for ValueWait<T> {
    type Output = Result<T, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.failed {
            return Poll::Ready(Err(error));
        }
        if let Some(value) = state.value.clone() {
            return Poll::Ready(Ok(value));
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
#[path = "reset_event_tests.rs"]
mod tests;
