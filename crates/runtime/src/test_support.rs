// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reusable services for lifecycle and resolver tests.
//!
//! Services record what happened to them in [`Probe`] counters (plain
//! atomics) so test threads outside the loop can assert without touching
//! loop-local state.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use async_trait::async_trait;

use ichor_core::{DependencyFlags, ResolverError, ServiceId, StartError};

use crate::coroutine::reset_event::AsyncManualResetEvent;
use crate::dm::{DependencyManager, ServiceHandle};
use crate::queue::PriorityQueue;
use crate::service::{Inject, Service, ServiceCtx, ServiceRef};

/// Synchronously dispatch queued events until idle, without starting the
/// loop thread. Deterministic harness for resolver and dispatch tests.
pub fn pump(queue: &PriorityQueue, dm: &DependencyManager) {
    while let Some(envelope) = queue.handle().try_pop() {
        dm.process_event(envelope);
    }
}

/// Cross-thread observable lifecycle counters.
#[derive(Clone, Default)]
pub struct Probe {
    pub starts: Arc<AtomicU64>,
    pub stops: Arc<AtomicU64>,
    pub adds: Arc<AtomicU64>,
    pub removes: Arc<AtomicU64>,
    /// Currently injected provider count (adds minus removes).
    pub injected: Arc<AtomicU64>,
    /// Provider ids in injection order.
    pub added_order: Arc<Mutex<Vec<u64>>>,
    /// Provider ids in removal order.
    pub removed_order: Arc<Mutex<Vec<u64>>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn adds(&self) -> u64 {
        self.adds.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    pub fn added_order(&self) -> Vec<u64> {
        self.added_order.lock().clone()
    }

    pub fn removed_order(&self) -> Vec<u64> {
        self.removed_order.lock().clone()
    }
}

/// Interface advertised by [`UselessService`].
pub trait IUseless {
    fn useless_id(&self) -> ServiceId;
}

/// A service that does nothing but exist and advertise [`IUseless`].
pub struct UselessService {
    cx: ServiceCtx,
}

impl Service for UselessService {}

impl IUseless for UselessService {
    fn useless_id(&self) -> ServiceId {
        self.cx.service_id()
    }
}

/// Register a [`UselessService`] provider.
pub fn register_useless(dm: &DependencyManager) -> Result<ServiceHandle, ResolverError> {
    dm.service_builder::<UselessService>()
        .implements::<dyn IUseless>(|svc| svc)
        .register(|cx| UselessService { cx })
}

/// Consumer of [`IUseless`] counting injections.
pub struct CountingConsumer {
    #[allow(dead_code)]
    cx: ServiceCtx,
    probe: Probe,
    peers: Cell<u64>,
}

impl CountingConsumer {
    pub fn peer_count(&self) -> u64 {
        self.peers.get()
    }
}

impl Service for CountingConsumer {}

impl Inject<dyn IUseless> for CountingConsumer {
    fn on_add(&self, implementation: Rc<dyn IUseless>, peer: &ServiceRef) {
        // The injected handle must point back at the peer it came from.
        assert_eq!(implementation.useless_id(), peer.id);
        self.peers.set(self.peers.get() + 1);
        self.probe.adds.fetch_add(1, Ordering::SeqCst);
        self.probe.injected.fetch_add(1, Ordering::SeqCst);
        self.probe.added_order.lock().push(peer.id.as_u64());
    }

    fn on_remove(&self, _implementation: Rc<dyn IUseless>, peer: &ServiceRef) {
        self.peers.set(self.peers.get() - 1);
        self.probe.removes.fetch_add(1, Ordering::SeqCst);
        self.probe.injected.fetch_sub(1, Ordering::SeqCst);
        self.probe.removed_order.lock().push(peer.id.as_u64());
    }
}

/// Register a [`CountingConsumer`] with the given dependency flags.
pub fn register_counting_consumer(
    dm: &DependencyManager,
    flags: DependencyFlags,
    probe: Probe,
) -> Result<ServiceHandle, ResolverError> {
    dm.service_builder::<CountingConsumer>()
        .depends_on::<dyn IUseless>(flags)
        .register(|cx| CountingConsumer { cx, probe, peers: Cell::new(0) })
}

/// Fails its first start, succeeds afterwards.
pub struct FlakyStartService {
    #[allow(dead_code)]
    cx: ServiceCtx,
    probe: Probe,
}

#[async_trait(?Send)]
impl Service for FlakyStartService {
    async fn start(self: Rc<Self>) -> Result<(), StartError> {
        let attempt = self.probe.starts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == 1 {
            Err(StartError::Failed)
        } else {
            Ok(())
        }
    }

    async fn stop(self: Rc<Self>) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn register_flaky(dm: &DependencyManager, probe: Probe) -> Result<ServiceHandle, ResolverError> {
    dm.service_builder::<FlakyStartService>().register(|cx| FlakyStartService { cx, probe })
}

/// Pushes a quit request from inside its own start, once its required
/// dependency arrived.
pub struct QuitOnStartService {
    cx: ServiceCtx,
    probe: Probe,
}

#[async_trait(?Send)]
impl Service for QuitOnStartService {
    async fn start(self: Rc<Self>) -> Result<(), StartError> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        self.cx.queue().push_quit(self.cx.service_id());
        Ok(())
    }

    async fn stop(self: Rc<Self>) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl Inject<dyn IUseless> for QuitOnStartService {
    fn on_add(&self, _implementation: Rc<dyn IUseless>, _peer: &ServiceRef) {
        self.probe.adds.fetch_add(1, Ordering::SeqCst);
    }

    fn on_remove(&self, _implementation: Rc<dyn IUseless>, _peer: &ServiceRef) {
        self.probe.removes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn register_quit_on_start(
    dm: &DependencyManager,
    probe: Probe,
) -> Result<ServiceHandle, ResolverError> {
    dm.service_builder::<QuitOnStartService>()
        .depends_on::<dyn IUseless>(DependencyFlags::REQUIRED)
        .register(|cx| QuitOnStartService { cx, probe })
}

/// Suspends its lifecycle hooks on a gate until [`GatedService::release`]
/// is called, exercising continuation re-entry.
pub struct GatedService {
    #[allow(dead_code)]
    cx: ServiceCtx,
    gate: AsyncManualResetEvent,
    probe: Probe,
}

impl GatedService {
    pub fn release(&self) {
        self.gate.set();
    }
}

#[async_trait(?Send)]
impl Service for GatedService {
    async fn start(self: Rc<Self>) -> Result<(), StartError> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        let _ = self.gate.wait().await;
        self.gate.reset();
        Ok(())
    }

    async fn stop(self: Rc<Self>) {
        let _ = self.gate.wait().await;
        self.gate.reset();
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn register_gated(dm: &DependencyManager, probe: Probe) -> Result<ServiceHandle, ResolverError> {
    dm.service_builder::<GatedService>().register(|cx| GatedService {
        gate: AsyncManualResetEvent::new(cx.dm()),
        cx,
        probe,
    })
}

/// Two unrelated interfaces implemented by one service, for checking the
/// double-dispatch injection contract.
pub trait IMixOne {
    fn one(&self) -> u32;
    fn mix_one_id(&self) -> ServiceId;
}

pub trait IMixTwo {
    fn two(&self) -> u32;
    fn mix_two_id(&self) -> ServiceId;
}

pub struct MixService {
    cx: ServiceCtx,
}

impl MixService {
    pub fn new(cx: ServiceCtx) -> Self {
        MixService { cx }
    }
}

impl Service for MixService {}

impl IMixOne for MixService {
    fn one(&self) -> u32 {
        1
    }

    fn mix_one_id(&self) -> ServiceId {
        self.cx.service_id()
    }
}

impl IMixTwo for MixService {
    fn two(&self) -> u32 {
        2
    }

    fn mix_two_id(&self) -> ServiceId {
        self.cx.service_id()
    }
}

pub fn register_mix(dm: &DependencyManager) -> Result<ServiceHandle, ResolverError> {
    dm.service_builder::<MixService>()
        .implements::<dyn IMixOne>(|svc| svc)
        .implements::<dyn IMixTwo>(|svc| svc)
        .register(|cx| MixService { cx })
}

/// Consumer of both mix interfaces, verifying that the two injections of
/// one provider share a service id but stay distinct typed views.
pub struct MixCheckService {
    #[allow(dead_code)]
    cx: ServiceCtx,
    one_peer: Cell<Option<ServiceId>>,
    two_peer: Cell<Option<ServiceId>>,
    pub same_peer: Arc<AtomicBool>,
    pub distinct_values: Arc<AtomicBool>,
}

impl Service for MixCheckService {}

impl MixCheckService {
    fn check(&self, one: Option<(ServiceId, u32)>, two: Option<(ServiceId, u32)>) {
        if let (Some((one_id, one_value)), Some((two_id, two_value))) = (one, two) {
            self.same_peer.store(one_id == two_id, Ordering::SeqCst);
            self.distinct_values.store(one_value != two_value, Ordering::SeqCst);
        }
    }
}

impl Inject<dyn IMixOne> for MixCheckService {
    fn on_add(&self, implementation: Rc<dyn IMixOne>, peer: &ServiceRef) {
        self.one_peer.set(Some(peer.id));
        self.check(
            Some((implementation.mix_one_id(), implementation.one())),
            self.two_peer.get().map(|id| (id, 2)),
        );
    }

    fn on_remove(&self, _implementation: Rc<dyn IMixOne>, _peer: &ServiceRef) {
        self.one_peer.set(None);
    }
}

impl Inject<dyn IMixTwo> for MixCheckService {
    fn on_add(&self, implementation: Rc<dyn IMixTwo>, peer: &ServiceRef) {
        self.two_peer.set(Some(peer.id));
        self.check(
            self.one_peer.get().map(|id| (id, 1)),
            Some((implementation.mix_two_id(), implementation.two())),
        );
    }

    fn on_remove(&self, _implementation: Rc<dyn IMixTwo>, _peer: &ServiceRef) {
        self.two_peer.set(None);
    }
}

pub struct MixCheckFlags {
    pub same_peer: Arc<AtomicBool>,
    pub distinct_values: Arc<AtomicBool>,
}

pub fn register_mix_check(
    dm: &DependencyManager,
) -> Result<(ServiceHandle, MixCheckFlags), ResolverError> {
    let same_peer = Arc::new(AtomicBool::new(false));
    let distinct_values = Arc::new(AtomicBool::new(false));
    let flags =
        MixCheckFlags { same_peer: same_peer.clone(), distinct_values: distinct_values.clone() };
    let handle = dm
        .service_builder::<MixCheckService>()
        .depends_on::<dyn IMixOne>(DependencyFlags::REQUIRED)
        .depends_on::<dyn IMixTwo>(DependencyFlags::REQUIRED)
        .register(|cx| MixCheckService {
            cx,
            one_peer: Cell::new(None),
            two_peer: Cell::new(None),
            same_peer,
            distinct_values,
        })?;
    Ok((handle, flags))
}
