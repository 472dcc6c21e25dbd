// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owning registration guards.
//!
//! Every registration on the dependency manager returns one of these.
//! Dropping a guard does not mutate the registry directly (that would
//! race the dispatch loop); it enqueues the matching `Remove*` event,
//! which the loop observes like any other work.

use ichor_core::{InterfaceKey, ServiceId};

use crate::envelope::{CallbackKey, FrameworkEvent};
use crate::queue::Queue;

use ichor_core::DEFAULT_EVENT_PRIORITY;

/// Owns one service's handler registration for one event type.
#[must_use = "dropping the registration unregisters the handler"]
pub struct EventHandlerRegistration {
    pub(crate) queue: Queue,
    pub(crate) key: CallbackKey,
}

impl EventHandlerRegistration {
    pub fn key(&self) -> CallbackKey {
        self.key
    }
}

impl Drop for EventHandlerRegistration {
    fn drop(&mut self) {
        self.queue.push_framework(
            ServiceId::FRAMEWORK,
            DEFAULT_EVENT_PRIORITY,
            FrameworkEvent::RemoveHandler { key: self.key },
        );
    }
}

/// Owns one service's interceptor registration for one event type (or
/// for all user events).
#[must_use = "dropping the registration unregisters the interceptor"]
pub struct EventInterceptorRegistration {
    pub(crate) queue: Queue,
    pub(crate) key: CallbackKey,
}

impl Drop for EventInterceptorRegistration {
    fn drop(&mut self) {
        self.queue.push_framework(
            ServiceId::FRAMEWORK,
            DEFAULT_EVENT_PRIORITY,
            FrameworkEvent::RemoveInterceptor { key: self.key },
        );
    }
}

/// Owns one service's completion-callback registration.
#[must_use = "dropping the registration unregisters the callbacks"]
pub struct CompletionCallbacksRegistration {
    pub(crate) queue: Queue,
    pub(crate) key: CallbackKey,
}

impl Drop for CompletionCallbacksRegistration {
    fn drop(&mut self) {
        self.queue.push_framework(
            ServiceId::FRAMEWORK,
            DEFAULT_EVENT_PRIORITY,
            FrameworkEvent::RemoveCompletionCallbacks { key: self.key },
        );
    }
}

/// Owns a dependency tracker registration for one interface.
#[must_use = "dropping the registration unregisters the tracker"]
pub struct DependencyTrackerRegistration {
    pub(crate) queue: Queue,
    pub(crate) service: ServiceId,
    pub(crate) interface: InterfaceKey,
}

impl DependencyTrackerRegistration {
    pub fn interface(&self) -> InterfaceKey {
        self.interface
    }
}

impl Drop for DependencyTrackerRegistration {
    fn drop(&mut self) {
        self.queue.push_framework(
            ServiceId::FRAMEWORK,
            DEFAULT_EVENT_PRIORITY,
            FrameworkEvent::RemoveTracker { service: self.service, interface: self.interface },
        );
    }
}
