// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Yield-producing coroutines.
//!
//! An [`AsyncGenerator`] couples a producer future with a one-slot
//! channel. The consumer drives the producer by polling
//! [`AsyncGenerator::resume`]; each [`Yield::yield_item`] hands one
//! value across and suspends the producer until the consumer asks for
//! the next one. The handshake follows a small state machine; owners
//! can request cancellation, which producers observe at their next
//! yield point and use to bail out before the generator is dropped.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::future::LocalBoxFuture;
use thiserror::Error;

/// Returned by [`Yield::yield_item`] when the owner cancelled the
/// generator; the producer should release its resources and return.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("generator cancelled")]
pub struct GeneratorCancelled;

/// Consumer/producer handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Consumer is driving; no value pending.
    ValueNotReadyConsumerActive,
    /// Consumer parked awaiting the next value.
    ValueNotReadyConsumerSuspended,
    /// Producer placed a value and is about to suspend.
    ValueReadyProducerActive,
    /// Producer parked on a taken yield slot.
    ValueReadyProducerSuspended,
    Cancelled,
    Finished,
}

struct GenShared<T> {
    slot: Option<T>,
    state: GeneratorState,
    cancelled: bool,
}

/// Producer-side handle used to emit values.
pub struct Yield<T> {
    shared: Rc<RefCell<GenShared<T>>>,
}

impl<T> Clone for Yield<T> {
    fn clone(&self) -> Self {
        Yield { shared: self.shared.clone() }
    }
}

impl<T> Yield<T> {
    /// Hand `value` to the consumer and suspend until it was taken.
    ///
    /// Resolves `Err(GeneratorCancelled)` when the owner requested
    /// cancellation; the producer must return promptly afterwards.
    pub fn yield_item(&self, value: T) -> YieldItem<'_, T> {
        YieldItem { shared: &self.shared, value: Some(value) }
    }

    /// Cancellation-check suspension point without a value.
    pub fn is_cancelled(&self) -> bool {
        self.shared.borrow().cancelled
    }
}

pub struct YieldItem<'a, T> {
    shared: &'a Rc<RefCell<GenShared<T>>>,
    value: Option<T>,
}

impl<T: Unpin> Future for YieldItem<'_, T> {
    type Output = Result<(), GeneratorCancelled>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut shared = this.shared.borrow_mut();
        if shared.cancelled {
            return Poll::Ready(Err(GeneratorCancelled));
        }
        match this.value.take() {
            Some(value) => {
                // First poll: park the value and suspend. The consumer
                // polling us sees Pending and picks the slot up.
                shared.slot = Some(value);
                shared.state = GeneratorState::ValueReadyProducerSuspended;
                Poll::Pending
            }
            None => {
                if shared.slot.is_some() {
                    // Still not taken; stay suspended.
                    Poll::Pending
                } else {
                    shared.state = GeneratorState::ValueNotReadyConsumerActive;
                    Poll::Ready(Ok(()))
                }
            }
        }
    }
}

/// A yield-producing coroutine driven by its consumer.
///
/// ```ignore
/// let mut gen = AsyncGenerator::new(|y| async move {
///     for n in 0..3 {
///         if y.yield_item(n).await.is_err() {
///             return;
///         }
///     }
/// });
/// while let Some(n) = gen.resume().await { /* ... */ }
/// ```
pub struct AsyncGenerator<T> {
    shared: Rc<RefCell<GenShared<T>>>,
    producer: LocalBoxFuture<'static, ()>,
    done: bool,
}

impl<T: 'static> AsyncGenerator<T> {
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(Yield<T>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let shared = Rc::new(RefCell::new(GenShared {
            slot: None,
            state: GeneratorState::ValueNotReadyConsumerActive,
            cancelled: false,
        }));
        let fut = producer(Yield { shared: shared.clone() });
        AsyncGenerator { shared, producer: Box::pin(fut), done: false }
    }

    /// Resume the producer until it yields the next value or finishes.
    pub fn resume(&mut self) -> Resume<'_, T> {
        Resume { gen: self }
    }

    /// Flip the generator into the cancelled state. The producer
    /// observes it at its next yield point.
    pub fn request_cancellation(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.cancelled = true;
        shared.state = GeneratorState::Cancelled;
    }

    pub fn state(&self) -> GeneratorState {
        if self.done {
            GeneratorState::Finished
        } else {
            self.shared.borrow().state
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn take_slot(&self) -> Option<T> {
        let mut shared = self.shared.borrow_mut();
        let value = shared.slot.take();
        if value.is_some() {
            shared.state = GeneratorState::ValueNotReadyConsumerActive;
        }
        value
    }
}

pub struct Resume<'a, T> {
    gen: &'a mut AsyncGenerator<T>,
}

impl<T: 'static> Future for Resume<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.gen.done {
            return Poll::Ready(None);
        }
        // A value may already be parked from the previous resumption.
        if let Some(value) = this.gen.take_slot() {
            return Poll::Ready(Some(value));
        }
        match this.gen.producer.as_mut().poll(cx) {
            Poll::Ready(()) => {
                this.gen.done = true;
                let leftover = this.gen.take_slot();
                if leftover.is_none() {
                    let mut shared = this.gen.shared.borrow_mut();
                    if shared.state != GeneratorState::Cancelled {
                        shared.state = GeneratorState::Finished;
                    }
                }
                Poll::Ready(leftover)
            }
            Poll::Pending => match this.gen.take_slot() {
                Some(value) => Poll::Ready(Some(value)),
                None => {
                    // Producer is parked on something external; the
                    // consumer parks with it and shares its waker.
                    self_suspend(&this.gen.shared);
                    Poll::Pending
                }
            },
        }
    }
}

fn self_suspend<T>(shared: &Rc<RefCell<GenShared<T>>>) {
    let mut shared = shared.borrow_mut();
    if shared.state != GeneratorState::Cancelled {
        shared.state = GeneratorState::ValueNotReadyConsumerSuspended;
    }
}

#[cfg(test)]
#[path = "generator_tests.rs"]
mod tests;
