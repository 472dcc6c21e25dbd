// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ichor-runtime: the Ichor event loop and dependency manager.
//!
//! One runtime instance is the pair of a [`queue::PriorityQueue`] and a
//! [`dm::DependencyManager`], pinned to a single OS thread. Services are
//! registered through a [`dm::ServiceBuilder`], announce interfaces to
//! the resolver, and receive events, injections and timer callbacks on
//! the owning thread only. Suspended async work re-enters the loop as
//! continuation events; the queue is the executor.

pub mod channel;
pub mod coroutine;
pub mod dm;
pub mod envelope;
pub mod handler;
pub mod queue;
pub mod registration;
pub mod scope;
pub mod service;

pub(crate) mod lifecycle;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use channel::BroadcastChannel;
pub use coroutine::generator::{AsyncGenerator, GeneratorCancelled, GeneratorState, Yield};
pub use coroutine::reset_event::{AsyncManualResetEvent, AsyncValueEvent};
pub use coroutine::task::Task;
pub use dm::{DependencyManager, DependencyRequest, ServiceBuilder, ServiceHandle};
pub use envelope::{
    DoWorkEvent, RemoveServiceEvent, RunFunctionEvent, StartServiceEvent, StopServiceEvent,
};
pub use handler::{EventFilter, EventFlow, InterceptDecision};
pub use queue::{PriorityQueue, Queue, QueueConfig};
pub use registration::{
    CompletionCallbacksRegistration, DependencyTrackerRegistration, EventHandlerRegistration,
    EventInterceptorRegistration,
};
pub use scope::current_service_id;
pub use service::{Inject, Service, ServiceCtx, ServiceRef};
