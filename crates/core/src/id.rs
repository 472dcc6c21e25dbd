// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity types for services, events, tasks and timers.
//!
//! All local identifiers are plain `u64` newtypes. Service ids are
//! process-wide unique and monotonically assigned; id `0` is reserved for
//! the framework itself. The globally-unique [`ServiceGid`] exists for
//! cross-process identification only and carries no semantics inside the
//! runtime.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

static SERVICE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static TIMER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static QUEUE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-local unique service id.
///
/// Monotonically assigned from a process-wide counter. `ServiceId::FRAMEWORK`
/// (id 0) marks events originated by the runtime rather than by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(u64);

impl ServiceId {
    /// Origin id for events pushed by the framework itself.
    pub const FRAMEWORK: ServiceId = ServiceId(0);

    /// Allocate the next process-wide service id.
    pub fn next() -> Self {
        ServiceId(SERVICE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        ServiceId(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_framework(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique service id, attached for cross-process identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceGid(Uuid);

impl ServiceGid {
    pub fn new() -> Self {
        ServiceGid(Uuid::new_v4())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ServiceGid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceGid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-queue event id. Strictly increasing in push order, so the pair
/// `(priority, id)` gives a total dispatch order with FIFO ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    pub const fn from_raw(raw: u64) -> Self {
        EventId(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of a parked coroutine in a dispatch loop's task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn from_raw(raw: u64) -> Self {
        TaskId(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide unique timer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// Allocate the next process-wide timer id.
    pub fn next() -> Self {
        TimerId(TIMER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide unique queue instance id, used by the broadcast channel
/// to attach and detach queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u64);

impl QueueId {
    /// Allocate the next process-wide queue id.
    pub fn next() -> Self {
        QueueId(QUEUE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
