// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The resolver: turns online/offline announcements into injections and
//! start/stop cascades.
//!
//! Two indexes are maintained: providers by interface (services
//! currently active under that key) and requesters by interface
//! (services declaring a dependency on it, in any state). Cascade events
//! carry the dependency priority so they sort ahead of user work; stop
//! cascades therefore detach consumers before the provider's own stop
//! runs.

use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use ichor_core::{
    Dependency, EventMeta, InterfaceKey, Properties, ServiceId, StartBehaviour,
    DEPENDENCY_EVENT_PRIORITY,
};

use crate::coroutine::TaskOutcome;
use crate::envelope::FrameworkEvent;
use crate::lifecycle::ServiceLifecycle;

use super::{DependencyManager, DependencyRequest, TrackerEntry};

impl DependencyManager {
    /// A provider finished starting: inject it into every interested
    /// consumer, then flip it active.
    pub(crate) fn handle_dependency_online(&self, service: ServiceId) {
        let Some(provider) = self.lm(service) else {
            tracing::warn!(service = %service, "online event for unknown service");
            return;
        };

        let interfaces = provider.interfaces();
        let consumers: BTreeSet<ServiceId> = {
            let requesters = self.shared.requesters_by_interface.borrow();
            interfaces
                .iter()
                .filter_map(|key| requesters.get(key))
                .flat_map(|set| set.iter().copied())
                .collect()
        };

        for consumer_id in consumers {
            let Some(consumer) = self.lm(consumer_id) else { continue };
            if consumer.clone().dependency_online(&provider) == StartBehaviour::Started {
                tracing::debug!(consumer = %consumer_id, provider = %service, "consumer became startable");
                self.shared.queue.push_framework(
                    consumer_id,
                    DEPENDENCY_EVENT_PRIORITY,
                    FrameworkEvent::StartService { service: consumer_id },
                );
            }
        }

        if provider.set_injected() {
            self.add_provider_index(&provider);
            tracing::debug!(service = %service, name = provider.service_name(), "active");
        }
    }

    /// A provider is about to stop: walk its dependees, remove the
    /// injections, and drive consumers that lost a required dependency
    /// to stop. The walk is an async generator so a suspending removal
    /// integrates with the loop, though removals themselves are
    /// synchronous callbacks.
    pub(crate) fn handle_dependency_offline(&self, service: ServiceId) {
        let Some(provider) = self.lm(service) else {
            tracing::warn!(service = %service, "offline event for unknown service");
            return;
        };
        let dm = self.clone();
        let fut = async move {
            for consumer_id in provider.dependees() {
                let Some(consumer) = dm.lm(consumer_id) else { continue };
                let mut removals = consumer.clone().dependency_offline(provider.clone());
                while let Some(behaviour) = removals.resume().await {
                    if behaviour == StartBehaviour::Stopped {
                        tracing::debug!(consumer = %consumer_id, provider = %provider.service_id(), "consumer lost required dependency");
                        dm.shared.queue.push_framework(
                            consumer_id,
                            DEPENDENCY_EVENT_PRIORITY,
                            FrameworkEvent::StopService {
                                service: consumer_id,
                                dependencies_stopped: false,
                            },
                        );
                    }
                }
            }
            if provider.set_uninjected() {
                dm.remove_provider_index(provider.service_id());
            }
            TaskOutcome::Plain
        };
        self.spawn_task(service, DEPENDENCY_EVENT_PRIORITY, false, Box::pin(fut));
    }

    /// A service declared a dependency: match it against the providers
    /// already active, then let registered trackers manufacture more.
    pub(crate) fn handle_dependency_request(
        &self,
        meta: EventMeta,
        requester: ServiceId,
        dependency: Dependency,
        properties: Option<Arc<Properties>>,
    ) {
        if let Some(consumer) = self.lm(requester) {
            let providers: Vec<ServiceId> = {
                let index = self.shared.providers_by_interface.borrow();
                index
                    .get(&dependency.interface)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default()
            };
            let mut became_startable = false;
            for provider_id in providers {
                let Some(provider) = self.lm(provider_id) else { continue };
                if provider.state() != ichor_core::ServiceState::Active {
                    continue;
                }
                if consumer.clone().dependency_online(&provider) == StartBehaviour::Started {
                    became_startable = true;
                }
            }
            if became_startable {
                self.shared.queue.push_framework(
                    requester,
                    DEPENDENCY_EVENT_PRIORITY,
                    FrameworkEvent::StartService { service: requester },
                );
            }
        }

        let trackers = self.trackers_for(dependency.interface);
        for tracker in trackers {
            let request = DependencyRequest {
                requester,
                interface: dependency.interface,
                flags: dependency.flags,
                priority: meta.priority,
                properties: properties.clone(),
            };
            let fut = (tracker.on_request)(self.clone(), request);
            self.spawn_task(
                tracker.service,
                meta.priority,
                false,
                Box::pin(async move {
                    fut.await;
                    TaskOutcome::Plain
                }),
            );
        }
    }

    pub(crate) fn handle_dependency_undo_request(
        &self,
        meta: EventMeta,
        requester: ServiceId,
        interface: InterfaceKey,
        properties: Option<Arc<Properties>>,
    ) {
        let trackers = self.trackers_for(interface);
        for tracker in trackers {
            let request = DependencyRequest {
                requester,
                interface,
                // The requester is already gone; flags are not recoverable
                // and trackers key their bookkeeping by requester id.
                flags: Default::default(),
                priority: meta.priority,
                properties: properties.clone(),
            };
            let fut = (tracker.on_undo)(self.clone(), request);
            self.spawn_task(
                tracker.service,
                meta.priority,
                false,
                Box::pin(async move {
                    fut.await;
                    TaskOutcome::Plain
                }),
            );
        }
    }

    fn trackers_for(&self, interface: InterfaceKey) -> Vec<Rc<TrackerEntry>> {
        self.shared.trackers.borrow().get(&interface).cloned().unwrap_or_default()
    }

    /// Final removal: balance every remaining injection with a removal,
    /// notify trackers, drop the manager.
    pub(crate) fn finish_remove(&self, service: ServiceId) {
        let Some(lm) = self.lm(service) else { return };

        lm.clone().release_injected(&|id| self.lm(id));

        for (dependency, properties) in lm.declared_requests() {
            self.shared.queue.push_framework(
                service,
                DEPENDENCY_EVENT_PRIORITY,
                FrameworkEvent::DependencyUndoRequest {
                    requester: service,
                    interface: dependency.interface,
                    properties,
                },
            );
            if let Some(set) =
                self.shared.requesters_by_interface.borrow_mut().get_mut(&dependency.interface)
            {
                set.remove(&service);
            }
        }
        self.remove_provider_index(service);
        self.shared.services.borrow_mut().remove(&service);
        lm.set_state(ichor_core::ServiceState::Uninstalled);
        tracing::debug!(service = %service, name = lm.service_name(), "removed");
    }

    pub(crate) fn add_provider_index(&self, provider: &Rc<dyn ServiceLifecycle>) {
        let mut providers = self.shared.providers_by_interface.borrow_mut();
        for key in provider.interfaces() {
            providers.entry(key).or_default().insert(provider.service_id());
        }
    }

    pub(crate) fn remove_provider_index(&self, service: ServiceId) {
        let mut providers = self.shared.providers_by_interface.borrow_mut();
        providers.retain(|_, set| {
            set.remove(&service);
            !set.is_empty()
        });
    }
}
