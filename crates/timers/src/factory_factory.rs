// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process-wide timer factory tracker.
//!
//! Registered once at startup, it watches dependency requests for the
//! [`TimerFactory`] interface. The first request from a service
//! manufactures a fresh [`TimerFactoryService`] carrying a service-id
//! filter, so the resolver injects it into that requester and nobody
//! else. Undo requests (requester removed) tear the factory down again.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use async_trait::async_trait;

use ichor_core::{
    Properties, ResolverError, ServiceId, ServiceIdFilter, StartError, FILTER_PROPERTY,
};
use ichor_runtime::{
    DependencyManager, DependencyRequest, DependencyTrackerRegistration, Service, ServiceCtx,
    ServiceHandle,
};

use crate::factory::{TimerFactory, TimerFactoryService, REQUESTING_SERVICE_PROPERTY};

/// Tracker service manufacturing one [`TimerFactoryService`] per
/// requester.
pub struct TimerFactoryFactory {
    cx: ServiceCtx,
    /// requester id → factory service id
    factories: RefCell<BTreeMap<ServiceId, ServiceId>>,
    registration: RefCell<Option<DependencyTrackerRegistration>>,
    quitting: Cell<bool>,
}

impl TimerFactoryFactory {
    pub fn new(cx: ServiceCtx) -> Self {
        TimerFactoryFactory {
            cx,
            factories: RefCell::new(BTreeMap::new()),
            registration: RefCell::new(None),
            quitting: Cell::new(false),
        }
    }

    pub fn created_factory_ids(&self) -> Vec<ServiceId> {
        self.factories.borrow().values().copied().collect()
    }

    fn handle_request(&self, dm: &DependencyManager, request: DependencyRequest) {
        if self.quitting.get() {
            return;
        }
        if self.factories.borrow().contains_key(&request.requester) {
            return;
        }
        let properties = Properties::new()
            .with(FILTER_PROPERTY, ServiceIdFilter(request.requester))
            .with(REQUESTING_SERVICE_PROPERTY, request.requester);
        let created = dm
            .service_builder::<TimerFactoryService>()
            .implements::<dyn TimerFactory>(|svc| svc)
            .properties(properties)
            .priority(request.priority)
            .register(TimerFactoryService::new);
        match created {
            Ok(handle) => {
                tracing::debug!(requester = %request.requester, factory = %handle.id(), "timer factory manufactured");
                self.factories.borrow_mut().insert(request.requester, handle.detach());
            }
            Err(error) => {
                tracing::error!(requester = %request.requester, %error, "failed to manufacture timer factory");
            }
        }
    }

    async fn handle_undo(&self, dm: &DependencyManager, request: DependencyRequest) {
        if self.quitting.get() {
            return;
        }
        let factory_id = self.factories.borrow_mut().remove(&request.requester);
        let Some(factory_id) = factory_id else { return };
        self.teardown_factory(dm, request.requester, factory_id).await;
    }

    /// Stop the factory's timers first, then hand it to the regular
    /// removal path.
    async fn teardown_factory(
        &self,
        dm: &DependencyManager,
        requester: ServiceId,
        factory_id: ServiceId,
    ) {
        tracing::debug!(requester = %requester, factory = %factory_id, "tearing down timer factory");
        if let Some(factory) = dm.get_service::<TimerFactoryService>(factory_id) {
            factory.stop_all_timers().await;
        }
        dm.queue().push_remove_service(self.cx.service_id(), factory_id);
    }
}

#[async_trait(?Send)]
impl Service for TimerFactoryFactory {
    async fn start(self: Rc<Self>) -> Result<(), StartError> {
        let me = self.clone();
        let undo_me = self.clone();
        let registration = self.cx.dm().register_dependency_tracker::<dyn TimerFactory, _, _, _, _>(
            self.cx.service_id(),
            move |dm, request| {
                let me = me.clone();
                async move { me.handle_request(&dm, request) }
            },
            move |dm, request| {
                let me = undo_me.clone();
                async move { me.handle_undo(&dm, request).await }
            },
        );
        *self.registration.borrow_mut() = Some(registration);
        Ok(())
    }

    async fn stop(self: Rc<Self>) {
        self.registration.borrow_mut().take();
        self.quitting.set(true);
        let factories: Vec<(ServiceId, ServiceId)> =
            self.factories.borrow().iter().map(|(k, v)| (*k, *v)).collect();
        for (requester, factory_id) in factories {
            self.teardown_factory(self.cx.dm(), requester, factory_id).await;
            self.factories.borrow_mut().remove(&requester);
        }
    }
}

/// Register the timer subsystem on a manager. Call once at startup,
/// before services that depend on [`TimerFactory`] start.
pub fn register_timer_factory_factory(
    dm: &DependencyManager,
) -> Result<ServiceHandle, ResolverError> {
    dm.service_builder::<TimerFactoryFactory>().register(TimerFactoryFactory::new)
}
