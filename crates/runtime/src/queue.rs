// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The priority event queue and its run loop.
//!
//! Exactly one OS thread drives a queue; producers on any thread push
//! through [`Queue`] handles (mutex + condvar). Two backings satisfy the
//! same contract: a binary heap keyed by `(priority, id)` and an ordered
//! map with stable iteration at equal priority. `len`/`is_empty` count
//! the event currently being dispatched so idle detection is correct.

use std::cell::RefCell;
use std::collections::{BTreeMap, BinaryHeap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use ichor_core::{
    Event, EventId, EventKey, EventMeta, Priority, QueueError, QueueId, ServiceId,
    DEFAULT_EVENT_PRIORITY,
};

use crate::dm::DependencyManager;
use crate::envelope::{
    EventEnvelope, EventPayload, FrameworkEvent, QuitPhase, RunAsyncClosure, RunClosure,
};

/// Upper bound for one condvar sleep; quit signals are re-checked at
/// least this often.
const MAX_SLEEP: Duration = Duration::from_millis(500);

/// Poll interval for [`Queue::wait_for_empty`].
const IDLE_POLL: Duration = Duration::from_micros(500);

static SIGINT_OBSERVED: AtomicBool = AtomicBool::new(false);
static SIGINT_REGISTERED: AtomicBool = AtomicBool::new(false);

fn install_sigint_handler() -> Result<(), QueueError> {
    if SIGINT_REGISTERED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    ctrlc::set_handler(|| SIGINT_OBSERVED.store(true, Ordering::SeqCst))
        .map_err(|e| QueueError::Signal(e.to_string()))
}

fn sigint_observed() -> bool {
    SIGINT_OBSERVED.load(Ordering::SeqCst)
}

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Bound on the drain after the first quit event; remaining events
    /// are discarded once it elapses.
    pub quit_timeout: Duration,
    /// Busy-wait this long before each condvar sleep. Trades CPU for
    /// wakeup latency under bursty load.
    pub spin_before_sleep: Option<Duration>,
    /// Use the ordered-map backing instead of the binary heap.
    pub ordered: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            quit_timeout: Duration::from_millis(5000),
            spin_before_sleep: None,
            ordered: false,
        }
    }
}

impl QueueConfig {
    ichor_core::setters! {
        set {
            quit_timeout: Duration,
            ordered: bool,
        }
        option {
            spin_before_sleep: Duration,
        }
    }
}

struct HeapEntry(EventEnvelope);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.meta.id == other.0.meta.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed so the max-heap pops the smallest (priority, id) first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.0.meta.priority, other.0.meta.id).cmp(&(self.0.meta.priority, self.0.meta.id))
    }
}

enum QueueBacking {
    Heap(BinaryHeap<HeapEntry>),
    Ordered(BTreeMap<(Priority, EventId), EventEnvelope>),
}

impl QueueBacking {
    fn insert(&mut self, envelope: EventEnvelope) {
        match self {
            QueueBacking::Heap(heap) => heap.push(HeapEntry(envelope)),
            QueueBacking::Ordered(map) => {
                map.insert((envelope.meta.priority, envelope.meta.id), envelope);
            }
        }
    }

    fn pop(&mut self) -> Option<EventEnvelope> {
        match self {
            QueueBacking::Heap(heap) => heap.pop().map(|entry| entry.0),
            QueueBacking::Ordered(map) => map.pop_first().map(|(_, envelope)| envelope),
        }
    }

    fn len(&self) -> usize {
        match self {
            QueueBacking::Heap(heap) => heap.len(),
            QueueBacking::Ordered(map) => map.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self) {
        match self {
            QueueBacking::Heap(heap) => heap.clear(),
            QueueBacking::Ordered(map) => map.clear(),
        }
    }
}

struct QueueState {
    backing: QueueBacking,
    next_event_id: u64,
    quit_event_sent: bool,
    quit_deadline: Option<Instant>,
}

impl QueueState {
    fn next_id(&mut self) -> EventId {
        let id = EventId::from_raw(self.next_event_id);
        self.next_event_id += 1;
        id
    }
}

pub(crate) struct QueueCore {
    id: QueueId,
    config: QueueConfig,
    state: Mutex<QueueState>,
    wakeup: Condvar,
    processing: AtomicBool,
    running: AtomicBool,
    quit: AtomicBool,
}

/// Cloneable, thread-safe push handle for one queue instance.
#[derive(Clone)]
pub struct Queue {
    core: Arc<QueueCore>,
}

impl Queue {
    pub fn id(&self) -> QueueId {
        self.core.id
    }

    /// Push a user event at the default priority. Non-blocking; returns
    /// the assigned event id.
    pub fn push_event<E: Event>(&self, origin: ServiceId, event: E) -> EventId {
        self.push_event_prioritised(origin, DEFAULT_EVENT_PRIORITY, event)
    }

    /// Push a user event at an explicit priority. Smaller runs sooner.
    pub fn push_event_prioritised<E: Event>(
        &self,
        origin: ServiceId,
        priority: Priority,
        event: E,
    ) -> EventId {
        self.push_envelope(
            origin,
            priority,
            EventPayload::User { key: EventKey::of::<E>(), payload: Box::new(event) },
        )
    }

    /// Ask the runtime to drain: stop every service, remove it, then exit
    /// the loop. Bounded by [`QueueConfig::quit_timeout`].
    pub fn push_quit(&self, origin: ServiceId) -> EventId {
        self.push_framework(
            origin,
            DEFAULT_EVENT_PRIORITY,
            FrameworkEvent::Quit { phase: QuitPhase::StopAll },
        )
    }

    /// Alias for [`Queue::push_quit`] with a framework origin.
    pub fn quit(&self) {
        self.push_quit(ServiceId::FRAMEWORK);
    }

    pub fn push_start_service(&self, origin: ServiceId, service: ServiceId) -> EventId {
        self.push_framework(
            origin,
            DEFAULT_EVENT_PRIORITY,
            FrameworkEvent::StartService { service },
        )
    }

    pub fn push_stop_service(&self, origin: ServiceId, service: ServiceId) -> EventId {
        self.push_framework(
            origin,
            DEFAULT_EVENT_PRIORITY,
            FrameworkEvent::StopService { service, dependencies_stopped: false },
        )
    }

    pub fn push_remove_service(&self, origin: ServiceId, service: ServiceId) -> EventId {
        self.push_framework(
            origin,
            DEFAULT_EVENT_PRIORITY,
            FrameworkEvent::RemoveService { service, dependencies_stopped: false },
        )
    }

    /// Push a no-op event; useful with completion callbacks.
    pub fn push_do_work(&self, origin: ServiceId) -> EventId {
        self.push_framework(origin, DEFAULT_EVENT_PRIORITY, FrameworkEvent::DoWork)
    }

    /// Run a closure on the loop thread.
    pub fn push_function(
        &self,
        origin: ServiceId,
        f: impl FnOnce(&DependencyManager) + Send + 'static,
    ) -> EventId {
        self.push_function_prioritised(origin, DEFAULT_EVENT_PRIORITY, f)
    }

    pub fn push_function_prioritised(
        &self,
        origin: ServiceId,
        priority: Priority,
        f: impl FnOnce(&DependencyManager) + Send + 'static,
    ) -> EventId {
        let f: RunClosure = Box::new(f);
        self.push_framework(origin, priority, FrameworkEvent::RunFunction { f })
    }

    /// Run an async closure on the loop thread; the future is driven by
    /// the queue like any other coroutine.
    pub fn push_function_async(
        &self,
        origin: ServiceId,
        f: impl FnOnce(DependencyManager) -> futures_util::future::LocalBoxFuture<'static, ()>
            + Send
            + 'static,
    ) -> EventId {
        self.push_function_async_prioritised(origin, DEFAULT_EVENT_PRIORITY, f)
    }

    pub fn push_function_async_prioritised(
        &self,
        origin: ServiceId,
        priority: Priority,
        f: impl FnOnce(DependencyManager) -> futures_util::future::LocalBoxFuture<'static, ()>
            + Send
            + 'static,
    ) -> EventId {
        let f: RunAsyncClosure = Box::new(f);
        self.push_framework(origin, priority, FrameworkEvent::RunFunctionAsync { f })
    }

    pub(crate) fn push_framework(
        &self,
        origin: ServiceId,
        priority: Priority,
        event: FrameworkEvent,
    ) -> EventId {
        self.push_envelope(origin, priority, EventPayload::Framework(event))
    }

    fn push_envelope(
        &self,
        origin: ServiceId,
        priority: Priority,
        payload: EventPayload,
    ) -> EventId {
        let id = {
            let mut state = self.core.state.lock();
            let id = state.next_id();
            if matches!(payload, EventPayload::Framework(FrameworkEvent::Quit { .. }))
                && !state.quit_event_sent
            {
                state.quit_event_sent = true;
                state.quit_deadline = Some(Instant::now() + self.core.config.quit_timeout);
            }
            state.backing.insert(EventEnvelope { meta: EventMeta { id, origin, priority }, payload });
            id
        };
        self.core.wakeup.notify_all();
        id
    }

    /// Queue depth, counting the event currently being dispatched.
    pub fn len(&self) -> usize {
        let queued = self.core.state.lock().backing.len();
        queued + usize::from(self.core.processing.load(Ordering::Acquire))
    }

    /// True only when nothing is queued and nothing is being dispatched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire) && !self.core.quit.load(Ordering::Acquire)
    }

    /// Block until the queue reports idle. Intended for coordinating
    /// threads in tests and tooling.
    pub fn wait_for_empty(&self) {
        while !self.is_empty() {
            if self.core.quit.load(Ordering::Acquire) {
                return;
            }
            std::thread::sleep(IDLE_POLL);
        }
    }

    /// Pop the next event, if any. Loop thread only.
    pub(crate) fn try_pop(&self) -> Option<EventEnvelope> {
        self.core.state.lock().backing.pop()
    }

    /// Immediately mark the loop for exit. Used by the quit protocol once
    /// every service is gone, and by the drain deadline.
    pub(crate) fn hard_quit(&self) {
        self.core.quit.store(true, Ordering::Release);
        self.core.wakeup.notify_all();
    }
}

/// A queue instance plus its dispatch loop. Lives on (and binds to) the
/// thread that calls [`PriorityQueue::start`].
pub struct PriorityQueue {
    core: Arc<QueueCore>,
    dm: RefCell<Option<DependencyManager>>,
    // Queue instances are thread-affine; handles are the Send side.
    _not_send: PhantomData<*const ()>,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let backing = if config.ordered {
            QueueBacking::Ordered(BTreeMap::new())
        } else {
            QueueBacking::Heap(BinaryHeap::new())
        };
        PriorityQueue {
            core: Arc::new(QueueCore {
                id: QueueId::next(),
                config,
                state: Mutex::new(QueueState {
                    backing,
                    next_event_id: 1,
                    quit_event_sent: false,
                    quit_deadline: None,
                }),
                wakeup: Condvar::new(),
                processing: AtomicBool::new(false),
                running: AtomicBool::new(false),
                quit: AtomicBool::new(false),
            }),
            dm: RefCell::new(None),
            _not_send: PhantomData,
        }
    }

    /// The Send/Sync push handle for this queue.
    pub fn handle(&self) -> Queue {
        Queue { core: self.core.clone() }
    }

    /// Create (or return) the dependency manager bound to this queue.
    pub fn create_manager(&self) -> DependencyManager {
        let mut slot = self.dm.borrow_mut();
        match &*slot {
            Some(dm) => dm.clone(),
            None => {
                let dm = DependencyManager::new(self.handle());
                *slot = Some(dm.clone());
                dm
            }
        }
    }

    /// Run the dispatch loop on the current thread until quit.
    ///
    /// With `capture_sigint`, the first SIGINT is translated into a
    /// graceful quit event; the drain is bounded by
    /// [`QueueConfig::quit_timeout`].
    pub fn start(&self, capture_sigint: bool) -> Result<(), QueueError> {
        let dm = self.dm.borrow().clone().ok_or(QueueError::NoManager)?;
        if self.core.running.swap(true, Ordering::AcqRel) {
            return Err(QueueError::AlreadyRunning);
        }
        if capture_sigint {
            install_sigint_handler()?;
        }
        dm.bind_to_current_thread();
        tracing::debug!(queue = %self.core.id, "event loop starting");

        loop {
            let envelope = {
                let mut state = self.core.state.lock();
                loop {
                    self.observe_quit_signals(&mut state);
                    if self.core.quit.load(Ordering::Acquire) || !state.backing.is_empty() {
                        break;
                    }
                    if let Some(spin) = self.core.config.spin_before_sleep {
                        // Spin briefly before sleeping; a cross-thread
                        // condvar wakeup costs far more than one interval
                        // of polling under sustained load.
                        let spin_until = Instant::now() + spin;
                        while state.backing.is_empty()
                            && !self.core.quit.load(Ordering::Acquire)
                            && Instant::now() < spin_until
                        {
                            MutexGuard::unlocked(&mut state, std::thread::yield_now);
                        }
                        if !state.backing.is_empty() {
                            break;
                        }
                    }
                    self.core.wakeup.wait_for(&mut state, MAX_SLEEP);
                }
                if self.core.quit.load(Ordering::Acquire) {
                    None
                } else {
                    let envelope = state.backing.pop();
                    if envelope.is_some() {
                        // Raised while the lock is held so len()/is_empty()
                        // never observe the popped event as missing.
                        self.core.processing.store(true, Ordering::Release);
                    }
                    envelope
                }
            };

            let Some(envelope) = envelope else { break };
            dm.process_event(envelope);
            self.core.processing.store(false, Ordering::Release);
        }

        self.drain_after_quit(&dm);
        dm.shutdown();
        self.core.running.store(false, Ordering::Release);
        tracing::debug!(queue = %self.core.id, "event loop stopped");
        Ok(())
    }

    fn observe_quit_signals(&self, state: &mut QueueState) {
        if sigint_observed() && !state.quit_event_sent {
            let id = state.next_id();
            state.backing.insert(EventEnvelope {
                meta: EventMeta {
                    id,
                    origin: ServiceId::FRAMEWORK,
                    priority: DEFAULT_EVENT_PRIORITY,
                },
                payload: EventPayload::Framework(FrameworkEvent::Quit {
                    phase: QuitPhase::StopAll,
                }),
            });
            state.quit_event_sent = true;
            state.quit_deadline = Some(Instant::now() + self.core.config.quit_timeout);
            tracing::info!(queue = %self.core.id, "SIGINT observed, draining");
        }
        if let Some(deadline) = state.quit_deadline {
            if Instant::now() >= deadline {
                self.core.quit.store(true, Ordering::Release);
            }
        }
    }

    /// After the loop exits, resume parked coroutines so they can observe
    /// the shutdown, then discard whatever is left.
    fn drain_after_quit(&self, dm: &DependencyManager) {
        dm.fail_pending_waits();
        let deadline = Instant::now() + self.core.config.quit_timeout;
        while Instant::now() < deadline {
            let Some(envelope) = self.handle().try_pop() else { break };
            match envelope.payload {
                EventPayload::Framework(FrameworkEvent::Continuable { task })
                | EventPayload::Framework(FrameworkEvent::ContinuableStart { task }) => {
                    dm.resume_task(task);
                }
                _ => {}
            }
        }
        self.core.state.lock().backing.clear();
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
