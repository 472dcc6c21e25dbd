// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event dispatch: the single place where service state transitions.
//!
//! Framework events are handled inline; user events run through the
//! interceptor/handler chain. Anything async (service starts and stops,
//! suspended handlers, run-functions) goes through the task table and
//! re-enters here as a continuation event.

use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::LocalBoxFuture;

use ichor_core::{
    EventKey, EventMeta, ServiceId, ServiceState, TaskId, DEFAULT_EVENT_PRIORITY,
    DEPENDENCY_EVENT_PRIORITY,
};

use crate::coroutine::waker::continuation_waker;
use crate::coroutine::{ParkedTask, TaskOutcome};
use crate::envelope::{
    CallbackKey, DoWorkEvent, EventEnvelope, EventPayload, FrameworkEvent, QuitPhase,
    RemoveServiceEvent, RunFunctionEvent, StartServiceEvent, StopServiceEvent,
};
use crate::handler::{EventFlow, InterceptDecision};
use crate::scope::ScopeGuard;

use super::DependencyManager;

/// Backoff while a re-armed quit or deferred stop waits for async work.
const SETTLE_SLEEP: Duration = Duration::from_millis(1);

impl DependencyManager {
    pub(crate) fn process_event(&self, envelope: EventEnvelope) {
        self.assert_loop_thread();
        let meta = envelope.meta;
        match envelope.payload {
            EventPayload::Framework(event) => {
                tracing::trace!(event = event.name(), id = %meta.id, origin = %meta.origin, "dispatch");
                self.process_framework_event(meta, event);
            }
            EventPayload::User { key, payload } => {
                tracing::trace!(event = key.name(), id = %meta.id, origin = %meta.origin, "dispatch");
                self.dispatch_user_event(meta, key, payload);
            }
        }
    }

    fn process_framework_event(&self, meta: EventMeta, event: FrameworkEvent) {
        match event {
            FrameworkEvent::DependencyOnline { service } => {
                self.handle_dependency_online(service);
            }
            FrameworkEvent::DependencyOffline { service } => {
                self.handle_dependency_offline(service);
            }
            FrameworkEvent::DependencyRequest { requester, dependency, properties } => {
                self.handle_dependency_request(meta, requester, dependency, properties);
            }
            FrameworkEvent::DependencyUndoRequest { requester, interface, properties } => {
                self.handle_dependency_undo_request(meta, requester, interface, properties);
            }
            FrameworkEvent::StartService { service } => {
                self.handle_start_service(meta, service);
            }
            FrameworkEvent::StopService { service, dependencies_stopped } => {
                self.handle_stop_service(meta, service, dependencies_stopped);
            }
            FrameworkEvent::RemoveService { service, dependencies_stopped } => {
                self.handle_remove_service(meta, service, dependencies_stopped);
            }
            FrameworkEvent::Quit { phase } => {
                self.handle_quit(meta, phase);
            }
            FrameworkEvent::RemoveHandler { key } => {
                if let Some(entries) = self.shared.handlers.borrow_mut().get_mut(&key.event) {
                    entries.retain(|entry| entry.key.service != key.service);
                }
            }
            FrameworkEvent::RemoveInterceptor { key } => {
                if let Some(entries) = self.shared.interceptors.borrow_mut().get_mut(&key.event) {
                    entries.retain(|entry| entry.key.service != key.service);
                }
                self.shared
                    .all_interceptors
                    .borrow_mut()
                    .retain(|entry| !(entry.service == key.service && key.event == EventKey::of::<crate::handler::AllEvents>()));
            }
            FrameworkEvent::RemoveCompletionCallbacks { key } => {
                self.shared.completions.borrow_mut().remove(&key);
            }
            FrameworkEvent::RemoveTracker { service, interface } => {
                let mut trackers = self.shared.trackers.borrow_mut();
                if let Some(entries) = trackers.get_mut(&interface) {
                    entries.retain(|entry| entry.service != service);
                    if entries.is_empty() {
                        trackers.remove(&interface);
                    }
                }
            }
            FrameworkEvent::RunFunction { f } => {
                {
                    let _scope = ScopeGuard::enter(meta.origin);
                    f(self);
                }
                self.run_completion(meta, EventKey::of::<RunFunctionEvent>());
            }
            FrameworkEvent::RunFunctionAsync { f } => {
                let fut = {
                    let _scope = ScopeGuard::enter(meta.origin);
                    f(self.clone())
                };
                self.spawn_task(
                    meta.origin,
                    meta.priority,
                    false,
                    Box::pin(async move {
                        fut.await;
                        TaskOutcome::Plain
                    }),
                );
            }
            FrameworkEvent::Continuable { task } | FrameworkEvent::ContinuableStart { task } => {
                self.resume_task(task);
            }
            FrameworkEvent::UnrecoverableError { message } => {
                tracing::error!(origin = %meta.origin, message, "unrecoverable error, shutting down");
                if !self.shared.quitting.get() {
                    self.shared.queue.push_quit(ServiceId::FRAMEWORK);
                }
            }
            FrameworkEvent::DoWork => {
                self.run_completion(meta, EventKey::of::<DoWorkEvent>());
            }
        }
    }

    fn handle_start_service(&self, meta: EventMeta, service: ServiceId) {
        let Some(lm) = self.lm(service) else {
            self.missing_service("start", meta, service, EventKey::of::<StartServiceEvent>());
            return;
        };
        if lm.state() != ServiceState::Installed {
            tracing::trace!(service = %service, state = %lm.state(), "start ignored");
            self.run_completion(meta, EventKey::of::<StartServiceEvent>());
            return;
        }
        if !lm.all_required_satisfied() {
            tracing::trace!(service = %service, "start deferred, required dependencies unsatisfied");
            return;
        }
        lm.set_state(ServiceState::Starting);
        let fut = lm.start_future();
        self.spawn_task(
            service,
            lm.priority(),
            true,
            Box::pin(async move {
                let result = fut.await;
                TaskOutcome::StartDone { service, result }
            }),
        );
        self.run_completion(meta, EventKey::of::<StartServiceEvent>());
    }

    fn handle_stop_service(&self, meta: EventMeta, service: ServiceId, dependencies_stopped: bool) {
        let Some(lm) = self.lm(service) else {
            self.missing_service("stop", meta, service, EventKey::of::<StopServiceEvent>());
            return;
        };
        if !dependencies_stopped {
            self.shared.queue.push_framework(
                service,
                DEPENDENCY_EVENT_PRIORITY,
                FrameworkEvent::DependencyOffline { service },
            );
            self.shared.queue.push_framework(
                meta.origin,
                meta.priority,
                FrameworkEvent::StopService { service, dependencies_stopped: true },
            );
            return;
        }
        match lm.state() {
            ServiceState::Active => {
                // Direct stop without a preceding offline cascade.
                lm.set_uninjected();
                self.remove_provider_index(service);
                self.begin_stop(service, false);
            }
            ServiceState::Uninjecting => {
                self.begin_stop(service, false);
            }
            ServiceState::Starting | ServiceState::Injecting | ServiceState::Stopping => {
                // A lifecycle coroutine is in flight; settle first.
                std::thread::sleep(SETTLE_SLEEP);
                self.shared.queue.push_framework(
                    meta.origin,
                    DEFAULT_EVENT_PRIORITY,
                    FrameworkEvent::StopService { service, dependencies_stopped: true },
                );
            }
            ServiceState::Installed | ServiceState::Uninstalled => {
                self.run_completion(meta, EventKey::of::<StopServiceEvent>());
            }
        }
    }

    fn handle_remove_service(
        &self,
        meta: EventMeta,
        service: ServiceId,
        dependencies_stopped: bool,
    ) {
        let Some(lm) = self.lm(service) else {
            self.missing_service("remove", meta, service, EventKey::of::<RemoveServiceEvent>());
            return;
        };
        if !dependencies_stopped {
            self.shared.queue.push_framework(
                service,
                DEPENDENCY_EVENT_PRIORITY,
                FrameworkEvent::DependencyOffline { service },
            );
            self.shared.queue.push_framework(
                meta.origin,
                meta.priority,
                FrameworkEvent::RemoveService { service, dependencies_stopped: true },
            );
            return;
        }
        match lm.state() {
            ServiceState::Installed => {
                self.finish_remove(service);
                self.run_completion(meta, EventKey::of::<RemoveServiceEvent>());
            }
            ServiceState::Active => {
                lm.set_uninjected();
                self.remove_provider_index(service);
                self.begin_stop(service, true);
            }
            ServiceState::Uninjecting => {
                self.begin_stop(service, true);
            }
            ServiceState::Starting | ServiceState::Injecting | ServiceState::Stopping => {
                std::thread::sleep(SETTLE_SLEEP);
                self.shared.queue.push_framework(
                    meta.origin,
                    DEFAULT_EVENT_PRIORITY,
                    FrameworkEvent::RemoveService { service, dependencies_stopped: true },
                );
            }
            ServiceState::Uninstalled => {}
        }
    }

    fn begin_stop(&self, service: ServiceId, remove_after: bool) {
        let Some(lm) = self.lm(service) else { return };
        lm.set_state(ServiceState::Stopping);
        let fut = lm.stop_future();
        self.spawn_task(
            service,
            lm.priority(),
            false,
            Box::pin(async move {
                fut.await;
                TaskOutcome::StopDone { service, remove_after }
            }),
        );
    }

    fn handle_quit(&self, meta: EventMeta, phase: QuitPhase) {
        match phase {
            QuitPhase::StopAll => {
                if self.shared.quitting.replace(true) {
                    return;
                }
                tracing::info!("quit requested, stopping all services");
                for service in self.service_ids() {
                    self.shared.queue.push_framework(
                        meta.origin,
                        DEPENDENCY_EVENT_PRIORITY,
                        FrameworkEvent::StopService { service, dependencies_stopped: false },
                    );
                }
                self.shared.queue.push_framework(
                    meta.origin,
                    DEFAULT_EVENT_PRIORITY,
                    FrameworkEvent::Quit { phase: QuitPhase::AwaitStopped },
                );
            }
            QuitPhase::AwaitStopped => {
                let all_stopped = {
                    let services = self.shared.services.borrow();
                    services.values().all(|lm| lm.state() == ServiceState::Installed)
                };
                if all_stopped {
                    for service in self.service_ids() {
                        self.shared.queue.push_framework(
                            meta.origin,
                            DEPENDENCY_EVENT_PRIORITY,
                            FrameworkEvent::RemoveService { service, dependencies_stopped: true },
                        );
                    }
                    self.shared.queue.push_framework(
                        meta.origin,
                        DEFAULT_EVENT_PRIORITY,
                        FrameworkEvent::Quit { phase: QuitPhase::AwaitRemoved },
                    );
                } else {
                    std::thread::sleep(SETTLE_SLEEP);
                    self.shared.queue.push_framework(
                        meta.origin,
                        DEFAULT_EVENT_PRIORITY,
                        FrameworkEvent::Quit { phase: QuitPhase::AwaitStopped },
                    );
                }
            }
            QuitPhase::AwaitRemoved => {
                if self.shared.services.borrow().is_empty() {
                    tracing::info!("all services removed, exiting loop");
                    self.shared.queue.hard_quit();
                } else {
                    std::thread::sleep(SETTLE_SLEEP);
                    self.shared.queue.push_framework(
                        meta.origin,
                        DEFAULT_EVENT_PRIORITY,
                        FrameworkEvent::Quit { phase: QuitPhase::AwaitRemoved },
                    );
                }
            }
        }
    }

    fn missing_service(&self, action: &str, meta: EventMeta, service: ServiceId, key: EventKey) {
        if self.shared.quitting.get() {
            // Quit cascades race service removal; silently skip.
            return;
        }
        self.run_error_completion(meta, key);
        self.shared.queue.push_framework(
            ServiceId::FRAMEWORK,
            DEFAULT_EVENT_PRIORITY,
            FrameworkEvent::UnrecoverableError {
                message: format!("cannot {action} unknown service {service}"),
            },
        );
    }

    fn dispatch_user_event(
        &self,
        meta: EventMeta,
        key: EventKey,
        payload: Box<dyn std::any::Any + Send>,
    ) {
        let payload: Rc<dyn std::any::Any + Send> = Rc::from(payload);
        let payload: Rc<dyn std::any::Any> = payload;

        let all_interceptors: Vec<_> = self.shared.all_interceptors.borrow().clone();
        let typed_interceptors: Vec<_> = self
            .shared
            .interceptors
            .borrow()
            .get(&key)
            .cloned()
            .unwrap_or_default();

        let mut vetoed = false;
        for entry in &all_interceptors {
            if (entry.pre)(meta) == InterceptDecision::Drop {
                vetoed = true;
                break;
            }
        }
        if !vetoed {
            for entry in &typed_interceptors {
                if (entry.pre)(payload.as_ref(), meta) == InterceptDecision::Drop {
                    vetoed = true;
                    break;
                }
            }
        }

        let mut handled = false;
        if !vetoed {
            let chain: Vec<_> =
                self.shared.handlers.borrow().get(&key).cloned().unwrap_or_default();
            for entry in chain {
                if self.get_service_state(entry.key.service) != Some(ServiceState::Active) {
                    continue;
                }
                if let Some(filter) = &entry.filter {
                    if !filter.matches(&meta) {
                        continue;
                    }
                }
                let flow = {
                    let _scope = ScopeGuard::enter(entry.key.service);
                    let fut = (entry.invoke)(payload.clone(), meta);
                    self.poll_handler(entry.key.service, meta.priority, fut)
                };
                handled = true;
                if flow == Some(EventFlow::PreventOthers) {
                    break;
                }
            }
        }

        for entry in &typed_interceptors {
            (entry.post)(payload.as_ref(), meta, handled);
        }
        for entry in &all_interceptors {
            (entry.post)(meta, handled);
        }
        self.run_completion(meta, key);
    }

    /// Poll a handler future once; park it when it suspends. Returns the
    /// flow decision of the synchronous portion, `None` when parked (a
    /// suspended handler counts as handled and cannot veto later
    /// handlers).
    fn poll_handler(
        &self,
        service: ServiceId,
        priority: ichor_core::Priority,
        mut fut: LocalBoxFuture<'static, EventFlow>,
    ) -> Option<EventFlow> {
        let task_id = self.alloc_task_id();
        let waker = continuation_waker(self.shared.queue.clone(), task_id, service, priority, false);
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(flow) => Some(flow),
            Poll::Pending => {
                let future: LocalBoxFuture<'static, TaskOutcome> = Box::pin(async move {
                    fut.await;
                    TaskOutcome::Plain
                });
                self.shared.tasks.borrow_mut().insert(
                    task_id,
                    ParkedTask { future, service, priority, start_kind: false },
                );
                None
            }
        }
    }

    /// Poll `future` immediately; park it under a fresh task id when it
    /// suspends. Completion feeds back into the lifecycle machinery.
    pub(crate) fn spawn_task(
        &self,
        service: ServiceId,
        priority: ichor_core::Priority,
        start_kind: bool,
        mut future: LocalBoxFuture<'static, TaskOutcome>,
    ) {
        let task_id = self.alloc_task_id();
        let waker =
            continuation_waker(self.shared.queue.clone(), task_id, service, priority, start_kind);
        let mut cx = Context::from_waker(&waker);
        let poll = {
            let _scope = ScopeGuard::enter(service);
            future.as_mut().poll(&mut cx)
        };
        match poll {
            Poll::Ready(outcome) => self.complete_task(outcome),
            Poll::Pending => {
                self.shared
                    .tasks
                    .borrow_mut()
                    .insert(task_id, ParkedTask { future, service, priority, start_kind });
            }
        }
    }

    /// Re-enter a parked coroutine. Stale ids (task already completed,
    /// or duplicate wakeups) are ignored.
    pub(crate) fn resume_task(&self, task: TaskId) {
        self.assert_loop_thread();
        let Some(mut parked) = self.shared.tasks.borrow_mut().remove(&task) else {
            tracing::trace!(task = %task, "stale continuation");
            return;
        };
        let waker = continuation_waker(
            self.shared.queue.clone(),
            task,
            parked.service,
            parked.priority,
            parked.start_kind,
        );
        let mut cx = Context::from_waker(&waker);
        let poll = {
            let _scope = ScopeGuard::enter(parked.service);
            parked.future.as_mut().poll(&mut cx)
        };
        match poll {
            Poll::Ready(outcome) => self.complete_task(outcome),
            Poll::Pending => {
                self.shared.tasks.borrow_mut().insert(task, parked);
            }
        }
    }

    fn complete_task(&self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::StartDone { service, result } => {
                let Some(lm) = self.lm(service) else { return };
                match result {
                    Ok(()) => {
                        lm.set_state(ServiceState::Injecting);
                        self.shared.queue.push_framework(
                            service,
                            DEPENDENCY_EVENT_PRIORITY,
                            FrameworkEvent::DependencyOnline { service },
                        );
                    }
                    Err(error) => {
                        tracing::warn!(service = %service, name = lm.service_name(), %error, "start failed");
                        lm.set_state(ServiceState::Installed);
                    }
                }
            }
            TaskOutcome::StopDone { service, remove_after } => {
                let Some(lm) = self.lm(service) else { return };
                lm.set_state(ServiceState::Installed);
                tracing::debug!(service = %service, name = lm.service_name(), "stopped");
                if remove_after {
                    self.finish_remove(service);
                }
            }
            TaskOutcome::Plain => {}
        }
    }

    pub(crate) fn run_completion(&self, meta: EventMeta, key: EventKey) {
        if meta.origin == ServiceId::FRAMEWORK {
            return;
        }
        let entry = {
            let completions = self.shared.completions.borrow();
            completions.get(&CallbackKey { service: meta.origin, event: key }).cloned()
        };
        let Some(entry) = entry else { return };
        if self.get_service_state(meta.origin) != Some(ServiceState::Active) {
            return;
        }
        (entry.on_complete)(meta);
    }

    pub(crate) fn run_error_completion(&self, meta: EventMeta, key: EventKey) {
        if meta.origin == ServiceId::FRAMEWORK {
            return;
        }
        let entry = {
            let completions = self.shared.completions.borrow();
            completions.get(&CallbackKey { service: meta.origin, event: key }).cloned()
        };
        let Some(entry) = entry else { return };
        if self.get_service_state(meta.origin) != Some(ServiceState::Active) {
            return;
        }
        (entry.on_error)(meta);
    }
}
