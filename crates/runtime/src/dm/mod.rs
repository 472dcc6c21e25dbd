// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dependency manager: service registry, resolver indexes, handler
//! tables and the coroutine task table for one queue instance.
//!
//! One manager exists per queue, shared as a cheap `Rc` clone. All of
//! its state is single-threaded; the only cross-thread surface is the
//! queue handle it pushes through. Registration APIs are safe to call
//! from services at any lifecycle point on the owning thread.

mod dispatch;
mod resolver;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::ThreadId;

use futures_util::future::LocalBoxFuture;

use ichor_core::{
    Dependency, DependencyFlags, Event, EventKey, EventMeta, InterfaceKey, Priority, Properties,
    ResolverError, ServiceGid, ServiceId, ServiceState, TaskId, DEFAULT_EVENT_PRIORITY,
    DEPENDENCY_EVENT_PRIORITY,
};

use crate::coroutine::reset_event::FailableWait;
use crate::coroutine::task::{Task, TaskSlot};
use crate::coroutine::{ParkedTask, TaskOutcome};
use crate::envelope::{CallbackKey, FrameworkEvent};
use crate::handler::{
    AllEventsInterceptorEntry, CompletionEntry, ErasedHandlerFn, EventFilter, EventFlow,
    HandlerEntry, InterceptDecision, InterceptorEntry,
};
use crate::lifecycle::{
    DependencyCallbacks, DependencySlot, InterfaceEntry, LifecycleManager, ServiceLifecycle,
};
use crate::queue::Queue;
use crate::registration::{
    CompletionCallbacksRegistration, DependencyTrackerRegistration, EventHandlerRegistration,
    EventInterceptorRegistration,
};
use crate::service::{Inject, Service, ServiceCtx, ServiceRef};

/// A dependency request as seen by a registered tracker.
#[derive(Clone)]
pub struct DependencyRequest {
    pub requester: ServiceId,
    pub interface: InterfaceKey,
    pub flags: DependencyFlags,
    pub priority: Priority,
    pub properties: Option<Arc<Properties>>,
}

pub(crate) struct TrackerEntry {
    pub service: ServiceId,
    pub on_request: Box<dyn Fn(DependencyManager, DependencyRequest) -> LocalBoxFuture<'static, ()>>,
    pub on_undo: Box<dyn Fn(DependencyManager, DependencyRequest) -> LocalBoxFuture<'static, ()>>,
}

pub(crate) struct DmShared {
    queue: Queue,
    pub(crate) services: RefCell<BTreeMap<ServiceId, Rc<dyn ServiceLifecycle>>>,
    pub(crate) providers_by_interface: RefCell<HashMap<InterfaceKey, BTreeSet<ServiceId>>>,
    pub(crate) requesters_by_interface: RefCell<HashMap<InterfaceKey, BTreeSet<ServiceId>>>,
    pub(crate) handlers: RefCell<HashMap<EventKey, Vec<Rc<HandlerEntry>>>>,
    pub(crate) interceptors: RefCell<HashMap<EventKey, Vec<Rc<InterceptorEntry>>>>,
    pub(crate) all_interceptors: RefCell<Vec<Rc<AllEventsInterceptorEntry>>>,
    pub(crate) completions: RefCell<HashMap<CallbackKey, Rc<CompletionEntry>>>,
    pub(crate) trackers: RefCell<HashMap<InterfaceKey, Vec<Rc<TrackerEntry>>>>,
    pub(crate) tasks: RefCell<HashMap<TaskId, ParkedTask>>,
    next_task: Cell<u64>,
    wait_primitives: RefCell<Vec<Weak<dyn FailableWait>>>,
    pub(crate) quitting: Cell<bool>,
    owner_thread: Cell<Option<ThreadId>>,
}

/// Handle to the runtime half of one queue instance.
#[derive(Clone)]
pub struct DependencyManager {
    pub(crate) shared: Rc<DmShared>,
}

impl DependencyManager {
    pub(crate) fn new(queue: Queue) -> Self {
        DependencyManager {
            shared: Rc::new(DmShared {
                queue,
                services: RefCell::new(BTreeMap::new()),
                providers_by_interface: RefCell::new(HashMap::new()),
                requesters_by_interface: RefCell::new(HashMap::new()),
                handlers: RefCell::new(HashMap::new()),
                interceptors: RefCell::new(HashMap::new()),
                all_interceptors: RefCell::new(Vec::new()),
                completions: RefCell::new(HashMap::new()),
                trackers: RefCell::new(HashMap::new()),
                tasks: RefCell::new(HashMap::new()),
                next_task: Cell::new(1),
                wait_primitives: RefCell::new(Vec::new()),
                quitting: Cell::new(false),
                owner_thread: Cell::new(None),
            }),
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.shared.queue
    }

    pub(crate) fn bind_to_current_thread(&self) {
        self.shared.owner_thread.set(Some(std::thread::current().id()));
    }

    /// Wrong-thread use is a programming error; checked in debug builds
    /// only, release builds carry no cost.
    pub(crate) fn assert_loop_thread(&self) {
        debug_assert!(
            self.shared
                .owner_thread
                .get()
                .is_none_or(|owner| owner == std::thread::current().id()),
            "dependency manager used from a foreign thread"
        );
    }

    /// Begin registering a service of type `S`.
    pub fn service_builder<S: Service>(&self) -> ServiceBuilder<S> {
        ServiceBuilder {
            dm: self.clone(),
            interfaces: Vec::new(),
            dependencies: Vec::new(),
            properties: Properties::new(),
            priority: DEFAULT_EVENT_PRIORITY,
        }
    }

    pub(crate) fn lm(&self, id: ServiceId) -> Option<Rc<dyn ServiceLifecycle>> {
        self.shared.services.borrow().get(&id).cloned()
    }

    pub fn service_count(&self) -> usize {
        self.shared.services.borrow().len()
    }

    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.shared.services.borrow().keys().copied().collect()
    }

    pub fn get_service_state(&self, id: ServiceId) -> Option<ServiceState> {
        self.lm(id).map(|lm| lm.state())
    }

    pub(crate) fn service_priority(&self, id: ServiceId) -> Priority {
        self.lm(id).map_or(DEFAULT_EVENT_PRIORITY, |lm| lm.priority())
    }

    /// Typed access to a registered service instance. Loop thread only.
    pub fn get_service<S: Service>(&self, id: ServiceId) -> Option<Rc<S>> {
        self.lm(id)?.service_any().downcast::<S>().ok()
    }

    /// Every active service advertising `I`, as typed interface handles,
    /// in creation order.
    pub fn started_services<I: ?Sized + 'static>(&self) -> Vec<Rc<I>> {
        let key = InterfaceKey::of::<I>();
        let services: Vec<Rc<dyn ServiceLifecycle>> =
            self.shared.services.borrow().values().cloned().collect();
        services
            .into_iter()
            .filter(|lm| lm.state() == ServiceState::Active)
            .filter_map(|lm| lm.query_interface(key))
            .filter_map(|payload| payload.downcast::<Rc<I>>().ok())
            .map(|boxed| *boxed)
            .collect()
    }

    /// Register an async handler for events of type `E`, delivered while
    /// `listener` is active.
    pub fn register_event_handler<E, F, Fut>(
        &self,
        listener: ServiceId,
        handler: F,
    ) -> EventHandlerRegistration
    where
        E: Event,
        F: Fn(Rc<E>, EventMeta) -> Fut + 'static,
        Fut: Future<Output = EventFlow> + 'static,
    {
        self.register_handler_entry::<E, F, Fut>(listener, handler, None)
    }

    /// As [`Self::register_event_handler`], with a dispatch filter.
    pub fn register_event_handler_filtered<E, F, Fut>(
        &self,
        listener: ServiceId,
        filter: EventFilter,
        handler: F,
    ) -> EventHandlerRegistration
    where
        E: Event,
        F: Fn(Rc<E>, EventMeta) -> Fut + 'static,
        Fut: Future<Output = EventFlow> + 'static,
    {
        self.register_handler_entry::<E, F, Fut>(listener, handler, Some(filter))
    }

    fn register_handler_entry<E, F, Fut>(
        &self,
        listener: ServiceId,
        handler: F,
        filter: Option<EventFilter>,
    ) -> EventHandlerRegistration
    where
        E: Event,
        F: Fn(Rc<E>, EventMeta) -> Fut + 'static,
        Fut: Future<Output = EventFlow> + 'static,
    {
        let key = CallbackKey { service: listener, event: EventKey::of::<E>() };
        let invoke: ErasedHandlerFn = Box::new(move |payload: Rc<dyn Any>, meta: EventMeta| {
            match payload.downcast::<E>() {
                Ok(event) => {
                    let fut: LocalBoxFuture<'static, EventFlow> = Box::pin(handler(event, meta));
                    fut
                }
                Err(_) => Box::pin(std::future::ready(EventFlow::AllowOthers)),
            }
        });
        self.shared
            .handlers
            .borrow_mut()
            .entry(key.event)
            .or_default()
            .push(Rc::new(HandlerEntry { key, filter, invoke }));
        EventHandlerRegistration { queue: self.shared.queue.clone(), key }
    }

    /// Register a pre/post interceptor pair for events of type `E`.
    pub fn register_event_interceptor<E: Event>(
        &self,
        listener: ServiceId,
        pre: impl Fn(&E, EventMeta) -> InterceptDecision + 'static,
        post: impl Fn(&E, EventMeta, bool) + 'static,
    ) -> EventInterceptorRegistration {
        let key = CallbackKey { service: listener, event: EventKey::of::<E>() };
        let entry = InterceptorEntry {
            key,
            pre: Box::new(move |payload: &dyn Any, meta| match payload.downcast_ref::<E>() {
                Some(event) => pre(event, meta),
                None => InterceptDecision::Proceed,
            }),
            post: Box::new(move |payload: &dyn Any, meta, handled| {
                if let Some(event) = payload.downcast_ref::<E>() {
                    post(event, meta, handled);
                }
            }),
        };
        self.shared
            .interceptors
            .borrow_mut()
            .entry(key.event)
            .or_default()
            .push(Rc::new(entry));
        EventInterceptorRegistration { queue: self.shared.queue.clone(), key }
    }

    /// Register an interceptor over every user event; the payload stays
    /// opaque, only envelope metadata is visible.
    pub fn register_all_events_interceptor(
        &self,
        listener: ServiceId,
        pre: impl Fn(EventMeta) -> InterceptDecision + 'static,
        post: impl Fn(EventMeta, bool) + 'static,
    ) -> EventInterceptorRegistration {
        let key =
            CallbackKey { service: listener, event: EventKey::of::<crate::handler::AllEvents>() };
        self.shared.all_interceptors.borrow_mut().push(Rc::new(AllEventsInterceptorEntry {
            service: listener,
            pre: Box::new(pre),
            post: Box::new(post),
        }));
        EventInterceptorRegistration { queue: self.shared.queue.clone(), key }
    }

    /// Register completion/error callbacks for events of type `E` pushed
    /// by `origin`, invoked after each such event is dispatched.
    pub fn register_completion_callbacks<E: Event>(
        &self,
        origin: ServiceId,
        on_complete: impl Fn(EventMeta) + 'static,
        on_error: impl Fn(EventMeta) + 'static,
    ) -> CompletionCallbacksRegistration {
        let key = CallbackKey { service: origin, event: EventKey::of::<E>() };
        self.shared.completions.borrow_mut().insert(
            key,
            Rc::new(CompletionEntry {
                on_complete: Box::new(on_complete),
                on_error: Box::new(on_error),
            }),
        );
        CompletionCallbacksRegistration { queue: self.shared.queue.clone(), key }
    }

    /// Register `tracker` as the manufacturer for interface `I`.
    ///
    /// Requests from services registered before the tracker are replayed
    /// to it immediately.
    pub fn register_dependency_tracker<I, FReq, FutReq, FUndo, FutUndo>(
        &self,
        tracker: ServiceId,
        on_request: FReq,
        on_undo: FUndo,
    ) -> DependencyTrackerRegistration
    where
        I: ?Sized + 'static,
        FReq: Fn(DependencyManager, DependencyRequest) -> FutReq + 'static,
        FutReq: Future<Output = ()> + 'static,
        FUndo: Fn(DependencyManager, DependencyRequest) -> FutUndo + 'static,
        FutUndo: Future<Output = ()> + 'static,
    {
        let interface = InterfaceKey::of::<I>();
        let entry = Rc::new(TrackerEntry {
            service: tracker,
            on_request: Box::new(move |dm, req| Box::pin(on_request(dm, req))),
            on_undo: Box::new(move |dm, req| Box::pin(on_undo(dm, req))),
        });
        self.shared.trackers.borrow_mut().entry(interface).or_default().push(entry.clone());

        // Replay requests from services that registered first.
        let existing: Vec<(ServiceId, Dependency, Option<Arc<Properties>>)> = {
            let services = self.shared.services.borrow();
            services
                .values()
                .flat_map(|lm| {
                    let id = lm.service_id();
                    lm.declared_requests()
                        .into_iter()
                        .filter(|(dep, _)| dep.interface == interface)
                        .map(move |(dep, props)| (id, dep, props))
                })
                .collect()
        };
        for (requester, dependency, properties) in existing {
            let request = DependencyRequest {
                requester,
                interface,
                flags: dependency.flags,
                priority: DEPENDENCY_EVENT_PRIORITY,
                properties,
            };
            let fut = (entry.on_request)(self.clone(), request);
            self.spawn_task(
                tracker,
                DEPENDENCY_EVENT_PRIORITY,
                false,
                Box::pin(async move {
                    fut.await;
                    TaskOutcome::Plain
                }),
            );
        }

        DependencyTrackerRegistration { queue: self.shared.queue.clone(), service: tracker, interface }
    }

    /// Spawn a value-producing coroutine under `origin`'s priority.
    ///
    /// The future is polled immediately; if it suspends it re-enters the
    /// loop as a continuation event. Awaiting the returned [`Task`]
    /// resolves with the value, or `Err(WaitError::Quitting)` on
    /// shutdown.
    pub fn spawn<T: 'static>(
        &self,
        origin: ServiceId,
        fut: impl Future<Output = T> + 'static,
    ) -> Task<T> {
        let priority = self.service_priority(origin);
        self.spawn_prioritised(origin, priority, fut)
    }

    /// As [`Self::spawn`], with an explicit continuation priority.
    pub fn spawn_prioritised<T: 'static>(
        &self,
        origin: ServiceId,
        priority: Priority,
        fut: impl Future<Output = T> + 'static,
    ) -> Task<T> {
        let (task, slot) = Task::new();
        let slot_dyn: Rc<dyn FailableWait> = slot.clone();
        self.register_wait_primitive(Rc::downgrade(&slot_dyn));
        self.spawn_task(
            origin,
            priority,
            false,
            Box::pin(async move {
                let value = fut.await;
                TaskSlot::complete(&slot, value);
                TaskOutcome::Plain
            }),
        );
        task
    }

    pub(crate) fn alloc_task_id(&self) -> TaskId {
        let id = self.shared.next_task.get();
        self.shared.next_task.set(id + 1);
        TaskId::from_raw(id)
    }

    pub(crate) fn register_wait_primitive(&self, primitive: Weak<dyn FailableWait>) {
        let mut primitives = self.shared.wait_primitives.borrow_mut();
        primitives.retain(|weak| weak.strong_count() > 0);
        primitives.push(primitive);
    }

    /// Resolve every pending wait primitive with `Quitting` so parked
    /// coroutines can observe the shutdown during the final drain.
    pub(crate) fn fail_pending_waits(&self) {
        let primitives: Vec<Weak<dyn FailableWait>> =
            self.shared.wait_primitives.borrow_mut().drain(..).collect();
        for weak in primitives {
            if let Some(primitive) = weak.upgrade() {
                primitive.fail(ichor_core::WaitError::Quitting);
            }
        }
    }

    /// Drop all runtime state after the loop exits. Remaining services
    /// are force-dropped.
    pub(crate) fn shutdown(&self) {
        self.shared.tasks.borrow_mut().clear();
        self.shared.handlers.borrow_mut().clear();
        self.shared.interceptors.borrow_mut().clear();
        self.shared.all_interceptors.borrow_mut().clear();
        self.shared.completions.borrow_mut().clear();
        self.shared.trackers.borrow_mut().clear();
        self.shared.providers_by_interface.borrow_mut().clear();
        self.shared.requesters_by_interface.borrow_mut().clear();
        let services: Vec<Rc<dyn ServiceLifecycle>> = {
            let mut map = self.shared.services.borrow_mut();
            let values = map.values().cloned().collect();
            map.clear();
            values
        };
        for lm in services {
            lm.set_state(ServiceState::Uninstalled);
        }
        self.shared.wait_primitives.borrow_mut().clear();
    }
}

/// Declarative registration of one service instance.
pub struct ServiceBuilder<S: Service> {
    dm: DependencyManager,
    interfaces: Vec<InterfaceEntry<S>>,
    dependencies: Vec<PendingDependency<S>>,
    properties: Properties,
    priority: Priority,
}

struct PendingDependency<S> {
    dependency: Dependency,
    properties: Option<Arc<Properties>>,
    callbacks: DependencyCallbacks<S>,
}

impl<S: Service> ServiceBuilder<S> {
    /// Advertise interface `I`. The closure is the provider-side cast
    /// (`|svc| svc` coerces when `S: I`); it is invoked per injection so
    /// multi-interface services never share a base pointer.
    pub fn implements<I: ?Sized + 'static>(mut self, cast: fn(Rc<S>) -> Rc<I>) -> Self {
        self.interfaces.push(InterfaceEntry {
            key: InterfaceKey::of::<I>(),
            cast: Box::new(move |service| Box::new(cast(service)) as Box<dyn Any>),
        });
        self
    }

    /// Declare a dependency on interface `I` with the given flags.
    pub fn depends_on<I: ?Sized + 'static>(self, flags: DependencyFlags) -> Self
    where
        S: Inject<I>,
    {
        self.depends_on_inner::<I>(flags, None)
    }

    /// As [`Self::depends_on`], attaching properties to the request so a
    /// tracker can parameterise the provider it manufactures.
    pub fn depends_on_with_properties<I: ?Sized + 'static>(
        self,
        flags: DependencyFlags,
        properties: Properties,
    ) -> Self
    where
        S: Inject<I>,
    {
        self.depends_on_inner::<I>(flags, Some(Arc::new(properties)))
    }

    fn depends_on_inner<I: ?Sized + 'static>(
        mut self,
        flags: DependencyFlags,
        properties: Option<Arc<Properties>>,
    ) -> Self
    where
        S: Inject<I>,
    {
        let on_add = Rc::new(|service: &S, payload: Box<dyn Any>, peer: &ServiceRef| {
            if let Ok(implementation) = payload.downcast::<Rc<I>>() {
                service.on_add(*implementation, peer);
            }
        });
        let on_remove = Rc::new(|service: &S, payload: Box<dyn Any>, peer: &ServiceRef| {
            if let Ok(implementation) = payload.downcast::<Rc<I>>() {
                service.on_remove(*implementation, peer);
            }
        });
        self.dependencies.push(PendingDependency {
            dependency: Dependency::new(InterfaceKey::of::<I>(), flags),
            properties,
            callbacks: DependencyCallbacks { on_add, on_remove },
        });
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Create the lifecycle manager, emit the dependency requests and the
    /// initial start event, and hand back the owning handle.
    ///
    /// Dropping the returned [`ServiceHandle`] enqueues removal; call
    /// [`ServiceHandle::detach`] to leave the service running for the
    /// lifetime of the queue.
    pub fn register(
        self,
        factory: impl FnOnce(ServiceCtx) -> S,
    ) -> Result<ServiceHandle, ResolverError> {
        let id = ServiceId::next();
        for (idx, entry) in self.interfaces.iter().enumerate() {
            if self.interfaces[..idx].iter().any(|other| other.key == entry.key) {
                return Err(ResolverError::DuplicateInterface { service: id, interface: entry.key });
            }
        }

        let gid = ServiceGid::new();
        let properties = Rc::new(RefCell::new(self.properties));
        let ctx = ServiceCtx {
            dm: self.dm.clone(),
            id,
            gid,
            properties: properties.clone(),
        };
        let service = Rc::new(factory(ctx));

        let slots: Vec<DependencySlot<S>> = self
            .dependencies
            .into_iter()
            .map(|pending| DependencySlot {
                dependency: pending.dependency,
                injected: Vec::new(),
                request_properties: pending.properties,
                callbacks: pending.callbacks,
            })
            .collect();

        let lm = Rc::new(LifecycleManager::new(
            id,
            gid,
            self.priority,
            service,
            self.interfaces,
            slots,
            properties,
        ));
        tracing::debug!(service = %id, name = lm.service_name(), "service registered");
        self.dm.shared.services.borrow_mut().insert(id, lm.clone());

        {
            let mut requesters = self.dm.shared.requesters_by_interface.borrow_mut();
            for (dependency, _) in lm.declared_requests() {
                requesters.entry(dependency.interface).or_default().insert(id);
            }
        }
        for (dependency, properties) in lm.declared_requests() {
            self.dm.shared.queue.push_framework(
                id,
                DEPENDENCY_EVENT_PRIORITY,
                FrameworkEvent::DependencyRequest { requester: id, dependency, properties },
            );
        }
        self.dm.shared.queue.push_framework(
            id,
            self.priority,
            FrameworkEvent::StartService { service: id },
        );

        Ok(ServiceHandle { id, queue: self.dm.shared.queue.clone(), remove_on_drop: true })
    }
}

/// Owning handle for a registered service.
#[must_use = "dropping the handle removes the service"]
pub struct ServiceHandle {
    id: ServiceId,
    queue: Queue,
    remove_on_drop: bool,
}

impl ServiceHandle {
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Give up removal-on-drop; the service stays until the queue quits.
    pub fn detach(mut self) -> ServiceId {
        self.remove_on_drop = false;
        self.id
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if self.remove_on_drop {
            self.queue.push_remove_service(ServiceId::FRAMEWORK, self.id);
        }
    }
}

#[cfg(test)]
#[path = "dm_tests.rs"]
mod tests;
