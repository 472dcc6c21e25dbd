// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queued event envelopes.
//!
//! Everything that goes through a queue is an [`EventEnvelope`]: metadata
//! plus either a framework payload (handled inline by the dispatch loop)
//! or an erased user payload (routed to registered handlers by key).

use std::any::Any;
use std::sync::Arc;

use futures_util::future::LocalBoxFuture;

use ichor_core::{
    Dependency, Event, EventKey, EventMeta, InterfaceKey, Properties, ServiceId, TaskId,
};

use crate::dm::DependencyManager;

/// Closure payload of a `RunFunction` event. Runs on the loop thread.
pub type RunClosure = Box<dyn FnOnce(&DependencyManager) + Send>;

/// Closure payload of a `RunFunctionAsync` event. The closure itself
/// crosses threads; the future it builds never leaves the loop thread.
pub type RunAsyncClosure =
    Box<dyn FnOnce(DependencyManager) -> LocalBoxFuture<'static, ()> + Send>;

/// Key identifying one service's registration for one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackKey {
    pub service: ServiceId,
    pub event: EventKey,
}

/// Phase of the quit drain protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitPhase {
    /// First quit observed: cascade stop events to every live service.
    StopAll,
    /// Re-armed until every service reports installed.
    AwaitStopped,
    /// Re-armed until the service map is empty, then the loop exits.
    AwaitRemoved,
}

/// Marker used to key completion callbacks for `DoWork` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoWorkEvent;

impl Event for DoWorkEvent {}

/// Marker keying completion callbacks for `RunFunction` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFunctionEvent;

impl Event for RunFunctionEvent {}

/// Marker keying completion callbacks for `StartService` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartServiceEvent;

impl Event for StartServiceEvent {}

/// Marker keying completion callbacks for `StopService` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopServiceEvent;

impl Event for StopServiceEvent {}

/// Marker keying completion callbacks for `RemoveService` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveServiceEvent;

impl Event for RemoveServiceEvent {}

/// Events the dispatch loop handles inline.
pub enum FrameworkEvent {
    DependencyOnline { service: ServiceId },
    DependencyOffline { service: ServiceId },
    DependencyRequest { requester: ServiceId, dependency: Dependency, properties: Option<Arc<Properties>> },
    DependencyUndoRequest { requester: ServiceId, interface: InterfaceKey, properties: Option<Arc<Properties>> },
    StartService { service: ServiceId },
    StopService { service: ServiceId, dependencies_stopped: bool },
    RemoveService { service: ServiceId, dependencies_stopped: bool },
    Quit { phase: QuitPhase },
    RemoveHandler { key: CallbackKey },
    RemoveInterceptor { key: CallbackKey },
    RemoveCompletionCallbacks { key: CallbackKey },
    RemoveTracker { service: ServiceId, interface: InterfaceKey },
    RunFunction { f: RunClosure },
    RunFunctionAsync { f: RunAsyncClosure },
    Continuable { task: TaskId },
    ContinuableStart { task: TaskId },
    UnrecoverableError { message: String },
    DoWork,
}

impl FrameworkEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            FrameworkEvent::DependencyOnline { .. } => "DependencyOnline",
            FrameworkEvent::DependencyOffline { .. } => "DependencyOffline",
            FrameworkEvent::DependencyRequest { .. } => "DependencyRequest",
            FrameworkEvent::DependencyUndoRequest { .. } => "DependencyUndoRequest",
            FrameworkEvent::StartService { .. } => "StartService",
            FrameworkEvent::StopService { .. } => "StopService",
            FrameworkEvent::RemoveService { .. } => "RemoveService",
            FrameworkEvent::Quit { .. } => "Quit",
            FrameworkEvent::RemoveHandler { .. } => "RemoveHandler",
            FrameworkEvent::RemoveInterceptor { .. } => "RemoveInterceptor",
            FrameworkEvent::RemoveCompletionCallbacks { .. } => "RemoveCompletionCallbacks",
            FrameworkEvent::RemoveTracker { .. } => "RemoveTracker",
            FrameworkEvent::RunFunction { .. } => "RunFunction",
            FrameworkEvent::RunFunctionAsync { .. } => "RunFunctionAsync",
            FrameworkEvent::Continuable { .. } => "Continuable",
            FrameworkEvent::ContinuableStart { .. } => "ContinuableStart",
            FrameworkEvent::UnrecoverableError { .. } => "UnrecoverableError",
            FrameworkEvent::DoWork => "DoWork",
        }
    }
}

/// The payload half of an envelope.
pub enum EventPayload {
    Framework(FrameworkEvent),
    User { key: EventKey, payload: Box<dyn Any + Send> },
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::Framework(fw) => fw.name(),
            EventPayload::User { key, .. } => key.name(),
        }
    }
}

/// One queued unit of work.
pub struct EventEnvelope {
    pub meta: EventMeta,
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ichor_core::{EventId, Priority};

    #[test]
    fn payload_names_are_stable() {
        let fw = FrameworkEvent::Quit { phase: QuitPhase::StopAll };
        assert_eq!(fw.name(), "Quit");

        let envelope = EventEnvelope {
            meta: EventMeta {
                id: EventId::from_raw(1),
                origin: ServiceId::FRAMEWORK,
                priority: Priority::new(10),
            },
            payload: EventPayload::Framework(FrameworkEvent::DoWork),
        };
        assert_eq!(envelope.payload.name(), "DoWork");
    }
}
