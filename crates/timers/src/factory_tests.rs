// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::factory_factory::register_timer_factory_factory;
use crate::timer::Timer;

use async_trait::async_trait;
use ichor_core::{DependencyFlags, ServiceId, StartError};
use ichor_runtime::{Inject, PriorityQueue, Service, ServiceCtx, ServiceRef};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Requests a private timer factory, ticks three times, then stops its
/// timer from the timer's own callback and quits.
struct TickingService {
    cx: ServiceCtx,
    factory: RefCell<Option<Rc<dyn TimerFactory>>>,
    timer: RefCell<Option<Rc<Timer>>>,
    ticks: Arc<AtomicU64>,
    stop_confirmed: Arc<AtomicBool>,
}

#[async_trait(?Send)]
impl Service for TickingService {
    async fn start(self: Rc<Self>) -> Result<(), StartError> {
        let factory = self.factory.borrow().clone();
        let factory = factory.ok_or(StartError::Failed)?;
        let timer = factory.create_timer();
        timer.set_interval(Duration::from_millis(10));

        let ticks = self.ticks.clone();
        let stop_confirmed = self.stop_confirmed.clone();
        let queue = self.cx.queue();
        let weak = Rc::downgrade(&timer);
        timer
            .set_callback(move |_dm| {
                let n = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 3 {
                    if let Some(timer) = weak.upgrade() {
                        let stop_confirmed = stop_confirmed.clone();
                        let queue = queue.clone();
                        timer.stop_with_callback(move || {
                            stop_confirmed.store(true, Ordering::SeqCst);
                            queue.quit();
                        });
                    }
                }
            })
            .map_err(|_| StartError::Failed)?;
        timer.start();
        *self.timer.borrow_mut() = Some(timer);
        Ok(())
    }

    async fn stop(self: Rc<Self>) {
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.stop();
        }
    }
}

impl Inject<dyn TimerFactory> for TickingService {
    fn on_add(&self, implementation: Rc<dyn TimerFactory>, _peer: &ServiceRef) {
        *self.factory.borrow_mut() = Some(implementation);
    }

    fn on_remove(&self, _implementation: Rc<dyn TimerFactory>, _peer: &ServiceRef) {
        self.factory.borrow_mut().take();
    }
}

#[test]
fn manufactured_factory_drives_a_service_timer() {
    let ticks = Arc::new(AtomicU64::new(0));
    let stop_confirmed = Arc::new(AtomicBool::new(false));
    let ticks_in = ticks.clone();
    let stop_in = stop_confirmed.clone();

    let runner = std::thread::spawn(move || {
        let queue = PriorityQueue::new();
        let dm = queue.create_manager();
        register_timer_factory_factory(&dm).unwrap().detach();
        dm.service_builder::<TickingService>()
            .depends_on::<dyn TimerFactory>(DependencyFlags::REQUIRED)
            .register(|cx| TickingService {
                cx,
                factory: RefCell::new(None),
                timer: RefCell::new(None),
                ticks: ticks_in,
                stop_confirmed: stop_in,
            })
            .unwrap()
            .detach();
        queue.start(false).unwrap();
    });

    runner.join().unwrap();
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert!(stop_confirmed.load(Ordering::SeqCst));
}

/// Waits for its factory injection, records which factory service it
/// got, and quits once the expected number of peers reported in.
struct FactoryProbeService {
    cx: ServiceCtx,
    factories_seen: Arc<parking_lot::Mutex<Vec<u64>>>,
    expected: usize,
}

impl Service for FactoryProbeService {}

impl Inject<dyn TimerFactory> for FactoryProbeService {
    fn on_add(&self, _implementation: Rc<dyn TimerFactory>, peer: &ServiceRef) {
        let mut seen = self.factories_seen.lock();
        seen.push(peer.id.as_u64());
        if seen.len() == self.expected {
            self.cx.queue().quit();
        }
    }

    fn on_remove(&self, _implementation: Rc<dyn TimerFactory>, _peer: &ServiceRef) {}
}

#[test]
fn every_requester_gets_its_own_factory() {
    let factories_seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen_in = factories_seen.clone();

    let runner = std::thread::spawn(move || {
        let queue = PriorityQueue::new();
        let dm = queue.create_manager();
        register_timer_factory_factory(&dm).unwrap().detach();
        for _ in 0..2 {
            let seen = seen_in.clone();
            dm.service_builder::<FactoryProbeService>()
                .depends_on::<dyn TimerFactory>(DependencyFlags::REQUIRED)
                .register(|cx| FactoryProbeService { cx, factories_seen: seen, expected: 2 })
                .unwrap()
                .detach();
        }
        queue.start(false).unwrap();
        assert_eq!(dm.service_count(), 0);
    });

    runner.join().unwrap();
    let seen = factories_seen.lock();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0], seen[1], "factories must be private per requester");
}

#[test]
fn destroy_timer_rejects_unknown_ids() {
    let queue = PriorityQueue::new();
    let dm = queue.create_manager();
    let handle = dm
        .service_builder::<TimerFactoryService>()
        .implements::<dyn TimerFactory>(|svc| svc)
        .register(TimerFactoryService::new)
        .unwrap();

    // The instance exists as soon as registration returns.
    let factory = dm.get_service::<TimerFactoryService>(handle.id()).unwrap();
    assert_eq!(factory.requesting_service(), ServiceId::FRAMEWORK);

    let timer = factory.create_timer();
    assert_eq!(factory.timer_count(), 1);
    assert!(factory.destroy_timer(timer.id()));
    assert!(!factory.destroy_timer(timer.id()));
    assert_eq!(factory.timer_count(), 0);

    let _ = handle.detach();
}
