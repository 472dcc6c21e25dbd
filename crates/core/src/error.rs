// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared error taxonomy.

use thiserror::Error;

use crate::dependency::InterfaceKey;
use crate::id::ServiceId;

/// A service's `start` failed. The service returns to `installed`; no
/// automatic retry is attempted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    #[error("service failed to start")]
    Failed,
}

/// Why an awaited framework primitive resolved without its value.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The queue is draining for shutdown; the coroutine was resumed so
    /// it can bail out, not because the awaited condition holds.
    #[error("queue is shutting down")]
    Quitting,
}

/// Queue startup and control errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is already running")]
    AlreadyRunning,
    #[error("queue has no dependency manager; call create_manager first")]
    NoManager,
    #[error("failed to install SIGINT handler: {0}")]
    Signal(String),
}

/// Resolver invariant violations. These are surfaced as unrecoverable
/// error events and cascade into a full shutdown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("service {0} is not registered")]
    UnknownService(ServiceId),
    #[error("service {service} advertises interface {interface} more than once")]
    DuplicateInterface { service: ServiceId, interface: InterfaceKey },
}

/// Timer configuration errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Callbacks may only be swapped while the timer is stopped.
    #[error("timer is not stopped")]
    NotStopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::InterfaceKey;

    trait IThing {}

    #[test]
    fn messages_render() {
        let err = ResolverError::DuplicateInterface {
            service: ServiceId::from_raw(7),
            interface: InterfaceKey::of::<dyn IThing>(),
        };
        let text = err.to_string();
        assert!(text.contains('7'));
        assert!(text.contains("IThing"));
        assert_eq!(WaitError::Quitting.to_string(), "queue is shutting down");
    }
}
