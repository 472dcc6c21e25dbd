// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle managers: the framework's private wrapper around a service.
//!
//! One `LifecycleManager<S>` per service instance, type-erased behind
//! [`ServiceLifecycle`] for the dependency manager. It owns the service
//! (`Rc<S>` of record), the advertised interface list with per-interface
//! cast closures, and the declared dependency slots with their typed
//! injection callbacks.
//!
//! Injection is double dispatch: the provider produces the correctly
//! typed `Rc<dyn I>` for a requested interface key and calls the
//! consumer-supplied injector with it. Multi-interface providers never
//! go through a common base pointer.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use futures_util::future::LocalBoxFuture;

use ichor_core::{
    Dependency, InterfaceKey, Priority, Properties, ServiceGid, ServiceId, ServiceState,
    StartBehaviour, StartError,
};

use crate::coroutine::generator::AsyncGenerator;
use crate::service::{Service, ServiceRef};

/// Consumer-supplied injection sink: receives a boxed `Rc<dyn I>` plus
/// the provider's identity.
pub(crate) type Injector<'a> = &'a mut dyn FnMut(Box<dyn Any>, &ServiceRef);

/// One advertised interface: its key and the provider-side cast.
pub(crate) struct InterfaceEntry<S> {
    pub key: InterfaceKey,
    pub cast: Box<dyn Fn(Rc<S>) -> Box<dyn Any>>,
}

/// Typed callbacks for one declared dependency, erased over the payload.
pub(crate) struct DependencyCallbacks<S> {
    pub on_add: Rc<dyn Fn(&S, Box<dyn Any>, &ServiceRef)>,
    pub on_remove: Rc<dyn Fn(&S, Box<dyn Any>, &ServiceRef)>,
}

pub(crate) struct DependencySlot<S> {
    pub dependency: Dependency,
    /// Providers currently injected, in injection order.
    pub injected: Vec<ServiceId>,
    pub request_properties: Option<Arc<Properties>>,
    pub callbacks: DependencyCallbacks<S>,
}

/// Object-safe view of a lifecycle manager, as seen by the dependency
/// manager and resolver.
pub(crate) trait ServiceLifecycle {
    fn service_id(&self) -> ServiceId;
    fn service_ref(&self) -> ServiceRef;
    fn service_name(&self) -> &'static str;
    fn priority(&self) -> Priority;
    fn state(&self) -> ServiceState;
    fn set_state(&self, state: ServiceState);

    fn interfaces(&self) -> Vec<InterfaceKey>;
    fn declared_requests(&self) -> Vec<(Dependency, Option<Arc<Properties>>)>;
    fn all_required_satisfied(&self) -> bool;
    fn filter_allows(&self, consumer: ServiceId) -> bool;

    /// Inject every matching interface of `provider` into this service.
    /// Returns `Started` when this made the service startable.
    fn dependency_online(self: Rc<Self>, provider: &Rc<dyn ServiceLifecycle>) -> StartBehaviour;

    /// Remove every injected interface of `provider` from this service,
    /// yielding one behaviour per removed interface so the resolver can
    /// react per edge.
    fn dependency_offline(
        self: Rc<Self>,
        provider: Rc<dyn ServiceLifecycle>,
    ) -> AsyncGenerator<StartBehaviour>;

    /// Release every injected provider, newest first. Used on removal so
    /// each `on_add` stays balanced by exactly one `on_remove`.
    fn release_injected(
        self: Rc<Self>,
        lookup: &dyn Fn(ServiceId) -> Option<Rc<dyn ServiceLifecycle>>,
    );

    /// Provider-side double dispatch: cast self to `key` and feed the
    /// result to the consumer's injector, recording the dependee.
    fn insert_self_into(&self, key: InterfaceKey, consumer: ServiceId, inject: Injector<'_>);
    fn remove_self_into(&self, key: InterfaceKey, consumer: ServiceId, inject: Injector<'_>);

    /// Cast without dependee bookkeeping, for introspection.
    fn query_interface(&self, key: InterfaceKey) -> Option<Box<dyn Any>>;

    fn start_future(&self) -> LocalBoxFuture<'static, Result<(), StartError>>;
    fn stop_future(&self) -> LocalBoxFuture<'static, ()>;

    /// `injecting → active`; false (and no transition) from any other state.
    fn set_injected(&self) -> bool;
    /// `active → uninjecting`; false (and no transition) from any other state.
    fn set_uninjected(&self) -> bool;

    /// Services this provider is currently injected into.
    fn dependees(&self) -> Vec<ServiceId>;

    /// The service instance as `Rc<dyn Any>` for typed downcasts.
    fn service_any(&self) -> Rc<dyn Any>;
}

pub(crate) struct LifecycleManager<S: Service> {
    id: ServiceId,
    gid: ServiceGid,
    name: &'static str,
    priority: Priority,
    state: Cell<ServiceState>,
    service: Rc<S>,
    interfaces: Vec<InterfaceEntry<S>>,
    dependencies: RefCell<Vec<DependencySlot<S>>>,
    dependees: RefCell<BTreeSet<ServiceId>>,
    properties: Rc<RefCell<Properties>>,
}

impl<S: Service> LifecycleManager<S> {
    pub(crate) fn new(
        id: ServiceId,
        gid: ServiceGid,
        priority: Priority,
        service: Rc<S>,
        interfaces: Vec<InterfaceEntry<S>>,
        dependencies: Vec<DependencySlot<S>>,
        properties: Rc<RefCell<Properties>>,
    ) -> Self {
        let name = service.name();
        LifecycleManager {
            id,
            gid,
            name,
            priority,
            state: Cell::new(ServiceState::Installed),
            service,
            interfaces,
            dependencies: RefCell::new(dependencies),
            dependees: RefCell::new(BTreeSet::new()),
            properties,
        }
    }

    fn entry(&self, key: InterfaceKey) -> Option<&InterfaceEntry<S>> {
        self.interfaces.iter().find(|entry| entry.key == key)
    }

    /// Remove `provider` from slot `idx`, invoking `on_remove`, and
    /// report whether that killed a required dependency.
    fn remove_provider_at(
        &self,
        idx: usize,
        provider: &Rc<dyn ServiceLifecycle>,
    ) -> StartBehaviour {
        let (key, on_remove) = {
            let slots = self.dependencies.borrow();
            let slot = &slots[idx];
            (slot.dependency.interface, slot.callbacks.on_remove.clone())
        };
        let service = self.service.clone();
        provider.remove_self_into(key, self.id, &mut |payload, peer| {
            on_remove(&service, payload, peer);
        });

        let mut slots = self.dependencies.borrow_mut();
        let slot = &mut slots[idx];
        slot.dependency.satisfied = slot.dependency.satisfied.saturating_sub(1);
        let provider_id = provider.service_id();
        slot.injected.retain(|id| *id != provider_id);
        let lost_required = slot.dependency.flags.required && slot.dependency.satisfied == 0;
        if lost_required && self.state.get().is_live() {
            StartBehaviour::Stopped
        } else {
            StartBehaviour::Done
        }
    }
}

impl<S: Service> ServiceLifecycle for LifecycleManager<S> {
    fn service_id(&self) -> ServiceId {
        self.id
    }

    fn service_ref(&self) -> ServiceRef {
        ServiceRef { id: self.id, gid: self.gid, name: self.name }
    }

    fn service_name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn state(&self) -> ServiceState {
        self.state.get()
    }

    fn set_state(&self, state: ServiceState) {
        tracing::trace!(service = %self.id, name = self.name, from = %self.state.get(), to = %state, "state transition");
        self.state.set(state);
    }

    fn interfaces(&self) -> Vec<InterfaceKey> {
        self.interfaces.iter().map(|entry| entry.key).collect()
    }

    fn declared_requests(&self) -> Vec<(Dependency, Option<Arc<Properties>>)> {
        self.dependencies
            .borrow()
            .iter()
            .map(|slot| (slot.dependency.clone(), slot.request_properties.clone()))
            .collect()
    }

    fn all_required_satisfied(&self) -> bool {
        self.dependencies.borrow().iter().all(|slot| slot.dependency.is_satisfied())
    }

    fn filter_allows(&self, consumer: ServiceId) -> bool {
        self.properties.borrow().filter().is_none_or(|filter| filter.allows(consumer))
    }

    fn dependency_online(self: Rc<Self>, provider: &Rc<dyn ServiceLifecycle>) -> StartBehaviour {
        if !provider.filter_allows(self.id) {
            return StartBehaviour::Done;
        }
        let provider_id = provider.service_id();
        let provider_interfaces = provider.interfaces();
        let slot_count = self.dependencies.borrow().len();
        let mut injected_any = false;

        for idx in 0..slot_count {
            let (key, on_add) = {
                let slots = self.dependencies.borrow();
                let slot = &slots[idx];
                if !provider_interfaces.contains(&slot.dependency.interface)
                    || slot.injected.contains(&provider_id)
                    || !slot.dependency.accepts_more()
                {
                    continue;
                }
                (slot.dependency.interface, slot.callbacks.on_add.clone())
            };

            // Borrow released: the callback is user code and may re-enter.
            let service = self.service.clone();
            provider.insert_self_into(key, self.id, &mut |payload, peer| {
                on_add(&service, payload, peer);
            });

            let mut slots = self.dependencies.borrow_mut();
            let slot = &mut slots[idx];
            slot.dependency.satisfied += 1;
            slot.injected.push(provider_id);
            injected_any = true;
        }

        if injected_any
            && self.state.get() == ServiceState::Installed
            && self.all_required_satisfied()
        {
            StartBehaviour::Started
        } else {
            StartBehaviour::Done
        }
    }

    fn dependency_offline(
        self: Rc<Self>,
        provider: Rc<dyn ServiceLifecycle>,
    ) -> AsyncGenerator<StartBehaviour> {
        AsyncGenerator::new(move |y| async move {
            let provider_id = provider.service_id();
            let slot_count = self.dependencies.borrow().len();
            for idx in 0..slot_count {
                let injected = {
                    let slots = self.dependencies.borrow();
                    slots[idx].injected.contains(&provider_id)
                };
                if !injected {
                    continue;
                }
                let behaviour = self.remove_provider_at(idx, &provider);
                if y.yield_item(behaviour).await.is_err() {
                    return;
                }
            }
        })
    }

    fn release_injected(
        self: Rc<Self>,
        lookup: &dyn Fn(ServiceId) -> Option<Rc<dyn ServiceLifecycle>>,
    ) {
        let slot_count = self.dependencies.borrow().len();
        for idx in (0..slot_count).rev() {
            loop {
                let provider_id = {
                    let slots = self.dependencies.borrow();
                    slots[idx].injected.last().copied()
                };
                let Some(provider_id) = provider_id else { break };
                match lookup(provider_id) {
                    Some(provider) => {
                        self.remove_provider_at(idx, &provider);
                    }
                    None => {
                        // Provider already gone; drop the bookkeeping.
                        let mut slots = self.dependencies.borrow_mut();
                        let slot = &mut slots[idx];
                        slot.injected.pop();
                        slot.dependency.satisfied = slot.dependency.satisfied.saturating_sub(1);
                    }
                }
            }
        }
    }

    fn insert_self_into(&self, key: InterfaceKey, consumer: ServiceId, inject: Injector<'_>) {
        if let Some(entry) = self.entry(key) {
            inject((entry.cast)(self.service.clone()), &self.service_ref());
            self.dependees.borrow_mut().insert(consumer);
        }
    }

    fn remove_self_into(&self, key: InterfaceKey, consumer: ServiceId, inject: Injector<'_>) {
        if let Some(entry) = self.entry(key) {
            inject((entry.cast)(self.service.clone()), &self.service_ref());
            self.dependees.borrow_mut().remove(&consumer);
        }
    }

    fn query_interface(&self, key: InterfaceKey) -> Option<Box<dyn Any>> {
        self.entry(key).map(|entry| (entry.cast)(self.service.clone()))
    }

    fn start_future(&self) -> LocalBoxFuture<'static, Result<(), StartError>> {
        let service = self.service.clone();
        Box::pin(async move { service.start().await })
    }

    fn stop_future(&self) -> LocalBoxFuture<'static, ()> {
        let service = self.service.clone();
        Box::pin(async move { service.stop().await })
    }

    fn set_injected(&self) -> bool {
        if self.state.get() != ServiceState::Injecting {
            return false;
        }
        self.set_state(ServiceState::Active);
        true
    }

    fn set_uninjected(&self) -> bool {
        if self.state.get() != ServiceState::Active {
            return false;
        }
        self.set_state(ServiceState::Uninjecting);
        true
    }

    fn dependees(&self) -> Vec<ServiceId> {
        self.dependees.borrow().iter().copied().collect()
    }

    fn service_any(&self) -> Rc<dyn Any> {
        self.service.clone()
    }
}
