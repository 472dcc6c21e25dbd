// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coroutine bridge: futures driven by the event queue.
//!
//! The queue is the executor. A future that returns `Pending` is parked
//! in the dispatch loop's task table together with the `(service id,
//! priority)` it runs under; its waker posts a continuation event, and
//! the loop resumes it on the owning thread. Nothing here blocks and
//! nothing migrates across threads.

pub mod generator;
pub mod reset_event;
pub mod task;
pub(crate) mod waker;

use futures_util::future::LocalBoxFuture;

use ichor_core::{Priority, ServiceId, StartError};

/// What the dispatch loop should do when a parked future completes.
pub(crate) enum TaskOutcome {
    /// A service's `start` finished.
    StartDone { service: ServiceId, result: Result<(), StartError> },
    /// A service's `stop` finished; optionally erase it afterwards.
    StopDone { service: ServiceId, remove_after: bool },
    /// Plain work (handlers, run-functions, spawned tasks).
    Plain,
}

/// A suspended future waiting for re-entry.
pub(crate) struct ParkedTask {
    pub future: LocalBoxFuture<'static, TaskOutcome>,
    pub service: ServiceId,
    pub priority: Priority,
    /// Continuations for lifecycle starts are posted as `ContinuableStart`.
    pub start_kind: bool,
}
