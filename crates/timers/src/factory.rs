// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-requester timer factories.
//!
//! A factory owns every timer it created. Its `stop` is the orderly half
//! of teardown: each owned timer is stopped cooperatively and the stop
//! suspends until all of their quit callbacks ran on the owning queue.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_trait::async_trait;

use ichor_runtime::{AsyncManualResetEvent, Service, ServiceCtx};

use ichor_core::{ServiceId, TimerId};

use crate::timer::Timer;

/// Property under which a factory records the service it was
/// manufactured for.
pub(crate) const REQUESTING_SERVICE_PROPERTY: &str = "requesting_service";

/// Interface under which timer factories are advertised. Declare a
/// dependency on it and the tracker manufactures a private factory for
/// the requesting service.
pub trait TimerFactory {
    /// Create a stopped timer owned by the requesting service.
    fn create_timer(&self) -> Rc<Timer>;

    /// Stop and drop a timer created by this factory. False when the id
    /// belongs to no live timer of this factory.
    fn destroy_timer(&self, id: TimerId) -> bool;
}

/// Concrete factory service, one per requesting service.
pub struct TimerFactoryService {
    cx: ServiceCtx,
    requesting: ServiceId,
    timers: RefCell<Vec<Rc<Timer>>>,
    quitting: Cell<bool>,
}

impl TimerFactoryService {
    pub fn new(cx: ServiceCtx) -> Self {
        let requesting = cx
            .properties()
            .get::<ServiceId>(REQUESTING_SERVICE_PROPERTY)
            .copied()
            .unwrap_or(ServiceId::FRAMEWORK);
        TimerFactoryService { cx, requesting, timers: RefCell::new(Vec::new()), quitting: Cell::new(false) }
    }

    pub fn requesting_service(&self) -> ServiceId {
        self.requesting
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Stop every owned timer and wait until each confirmed on the
    /// owning queue.
    pub async fn stop_all_timers(&self) {
        let timers: Vec<Rc<Timer>> = self.timers.borrow().iter().cloned().collect();
        if timers.is_empty() {
            return;
        }
        let all_stopped = AsyncManualResetEvent::new(self.cx.dm());
        let remaining = Rc::new(Cell::new(timers.len()));
        for timer in &timers {
            let all_stopped = all_stopped.clone();
            let remaining = remaining.clone();
            timer.stop_with_callback(move || {
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    all_stopped.set();
                }
            });
        }
        // Already-stopped timers confirmed inline; only wait for the rest.
        if remaining.get() > 0 {
            let _ = all_stopped.wait().await;
        }
        self.timers.borrow_mut().clear();
        tracing::debug!(factory = %self.cx.service_id(), requesting = %self.requesting, "all timers quit");
    }
}

#[async_trait(?Send)]
impl Service for TimerFactoryService {
    /// Orderly teardown: nothing progresses past this factory until all
    /// of its timers confirmed their stop on the owning queue.
    async fn stop(self: Rc<Self>) {
        self.quitting.set(true);
        self.stop_all_timers().await;
    }
}

impl TimerFactory for TimerFactoryService {
    fn create_timer(&self) -> Rc<Timer> {
        if self.quitting.get() {
            tracing::warn!(factory = %self.cx.service_id(), "timer created during factory teardown");
        }
        let timer = Rc::new(Timer::new(self.cx.dm(), self.requesting));
        tracing::trace!(factory = %self.cx.service_id(), timer = %timer.id(), owner = %self.requesting, "timer created");
        self.timers.borrow_mut().push(timer.clone());
        timer
    }

    fn destroy_timer(&self, id: TimerId) -> bool {
        let timer = {
            let mut timers = self.timers.borrow_mut();
            match timers.iter().position(|timer| timer.id() == id) {
                Some(idx) => timers.remove(idx),
                None => return false,
            }
        };
        timer.stop();
        true
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
