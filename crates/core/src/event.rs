// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User event vocabulary.
//!
//! A user event is any `Send + 'static` type that opts in by implementing
//! the [`Event`] marker. Events are keyed by [`EventKey`] (their `TypeId`)
//! for handler and interceptor routing; the queue wraps each payload in an
//! envelope carrying [`EventMeta`].

use std::any::{Any, TypeId};
use std::fmt;

use crate::id::{EventId, ServiceId};
use crate::priority::Priority;

/// Marker trait for user-defined event payloads.
///
/// Implement it explicitly for every event type:
///
/// ```ignore
/// struct PingEvent { seq: u64 }
/// impl ichor_core::Event for PingEvent {}
/// ```
pub trait Event: Any + Send + 'static {}

/// Stable key of an event type, plus its name for diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey {
    id: TypeId,
    name: &'static str,
}

impl EventKey {
    pub fn of<E: Event>() -> Self {
        EventKey { id: TypeId::of::<E>(), name: std::any::type_name::<E>() }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventKey({})", self.name)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Envelope metadata attached to every queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    /// Queue-local id, strictly increasing in push order.
    pub id: EventId,
    /// Service that pushed the event; `ServiceId::FRAMEWORK` for the runtime.
    pub origin: ServiceId,
    /// Dispatch priority, smaller first.
    pub priority: Priority,
}

/// A transient error surfaced to subscribed handlers, e.g. by a
/// connection factory that wants a collaborator to decide on retry or
/// backoff. Not handled by the framework itself.
#[derive(Debug, Clone)]
pub struct RecoverableErrorEvent {
    /// Free-form discriminator so one subscriber can tell error sources apart.
    pub error_kind: u64,
    pub message: String,
}

impl Event for RecoverableErrorEvent {}

#[cfg(test)]
mod tests {
    use super::*;

    struct PingEvent;
    impl Event for PingEvent {}

    struct PongEvent;
    impl Event for PongEvent {}

    #[test]
    fn keys_discriminate_event_types() {
        assert_eq!(EventKey::of::<PingEvent>(), EventKey::of::<PingEvent>());
        assert_ne!(EventKey::of::<PingEvent>(), EventKey::of::<PongEvent>());
    }

    #[test]
    fn key_name_is_type_name() {
        assert!(EventKey::of::<PingEvent>().name().contains("PingEvent"));
    }
}
