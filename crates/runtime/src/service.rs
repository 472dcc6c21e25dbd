// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The service contract.
//!
//! A service is a long-lived object owned by its lifecycle manager and
//! driven entirely from the queue thread. `start`/`stop` are async and
//! take `Rc<Self>` receivers so a suspended lifecycle future owns the
//! service while parked; state lives in `Cell`/`RefCell` fields and
//! borrows must not be held across awaits (the resolver may run this
//! service's own dependency callbacks between suspension points).

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use async_trait::async_trait;

use ichor_core::{Priority, Properties, ServiceGid, ServiceId, ServiceState, StartError};

use crate::dm::DependencyManager;
use crate::queue::Queue;

/// Lightweight identity snapshot of a peer service, passed alongside
/// every injection.
#[derive(Debug, Clone)]
pub struct ServiceRef {
    pub id: ServiceId,
    pub gid: ServiceGid,
    pub name: &'static str,
}

/// Per-service context handed to the factory at registration.
///
/// Holds the service's identity, its property bag and a handle to the
/// dependency manager; services keep it as a field.
#[derive(Clone)]
pub struct ServiceCtx {
    pub(crate) dm: DependencyManager,
    pub(crate) id: ServiceId,
    pub(crate) gid: ServiceGid,
    pub(crate) properties: Rc<RefCell<Properties>>,
}

impl ServiceCtx {
    pub fn dm(&self) -> &DependencyManager {
        &self.dm
    }

    pub fn queue(&self) -> Queue {
        self.dm.queue().clone()
    }

    pub fn service_id(&self) -> ServiceId {
        self.id
    }

    pub fn service_gid(&self) -> ServiceGid {
        self.gid
    }

    /// Current lifecycle state, as tracked by the owning manager.
    pub fn state(&self) -> ServiceState {
        self.dm.get_service_state(self.id).unwrap_or(ServiceState::Uninstalled)
    }

    pub fn priority(&self) -> Priority {
        self.dm.service_priority(self.id)
    }

    pub fn properties(&self) -> Ref<'_, Properties> {
        self.properties.borrow()
    }

    /// Properties are mutable only by the owning service.
    pub fn properties_mut(&self) -> RefMut<'_, Properties> {
        self.properties.borrow_mut()
    }
}

/// User-defined unit of behaviour with async lifecycle hooks.
///
/// `start` runs only from `installed` with every required dependency
/// satisfied; returning an error puts the service back to `installed`.
/// Neither hook may block the thread: long work is expressed as awaits,
/// and state observed before an await must be re-checked after it.
#[async_trait(?Send)]
pub trait Service: 'static {
    async fn start(self: Rc<Self>) -> Result<(), StartError> {
        Ok(())
    }

    async fn stop(self: Rc<Self>) {}

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Typed dependency callbacks, one impl per declared interface.
///
/// `on_add`/`on_remove` run synchronously on the queue thread while the
/// resolver walks an online/offline cascade. A consumer must drop every
/// handle received in `on_add` when the matching `on_remove` arrives;
/// the `Rc` is a view handed out under that contract, not shared
/// ownership.
pub trait Inject<I: ?Sized + 'static> {
    fn on_add(&self, implementation: Rc<I>, peer: &ServiceRef);
    fn on_remove(&self, implementation: Rc<I>, peer: &ServiceRef);
}
