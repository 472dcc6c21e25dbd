// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single timer: helper-thread ticker plus loop-side callback hooks.
//!
//! The ticker thread never runs user code. On every period it pushes a
//! run-function event at the timer's stored priority and owner id; the
//! dispatch loop resolves the timer through a thread-local registry and
//! runs the callback there. Stopping is cooperative: `Stopping` is
//! observed at the next sleep slice, after which the quit callbacks are
//! dispatched on the owning queue.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures_util::future::LocalBoxFuture;
use parking_lot::Mutex;

use ichor_core::{Priority, ServiceId, TimerError, TimerId, TimerState, DEFAULT_EVENT_PRIORITY};
use ichor_runtime::{DependencyManager, Queue};

/// Floor and ceiling for one ticker sleep slice. A slice is a tenth of
/// the interval, clamped so stops stay responsive for long intervals.
const MIN_SLICE: Duration = Duration::from_micros(100);
const MAX_SLICE: Duration = Duration::from_millis(100);

thread_local! {
    /// Timers owned by this queue thread, resolved when a tick's
    /// run-function event executes.
    static TIMERS: RefCell<HashMap<TimerId, Weak<TimerHooks>>> = RefCell::new(HashMap::new());
}

enum TimerCallback {
    None,
    Sync(Rc<dyn Fn(&DependencyManager)>),
    Async(Rc<dyn Fn(DependencyManager) -> LocalBoxFuture<'static, ()>>),
}

/// Loop-side half: callback and teardown hooks. Never crosses threads.
struct TimerHooks {
    callback: RefCell<TimerCallback>,
    quit_callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
}

struct TickerState {
    state: TimerState,
    interval: Duration,
    priority: Priority,
    fire_once: bool,
    thread: Option<JoinHandle<()>>,
}

/// Thread-shared half: what the ticker thread reads each slice.
struct TickerShared {
    id: TimerId,
    owner: ServiceId,
    queue: Queue,
    state: Mutex<TickerState>,
}

/// A fire-once or repeating timer owned by one service.
///
/// Created through a [`crate::TimerFactory`]; all methods are loop-thread
/// only. Interval and priority may change while running; the callback
/// may not.
pub struct Timer {
    ticker: Arc<TickerShared>,
    hooks: Rc<TimerHooks>,
}

impl Timer {
    pub(crate) fn new(dm: &DependencyManager, owner: ServiceId) -> Self {
        let id = TimerId::next();
        let hooks = Rc::new(TimerHooks {
            callback: RefCell::new(TimerCallback::None),
            quit_callbacks: RefCell::new(Vec::new()),
        });
        TIMERS.with(|registry| {
            registry.borrow_mut().insert(id, Rc::downgrade(&hooks));
        });
        Timer {
            ticker: Arc::new(TickerShared {
                id,
                owner,
                queue: dm.queue().clone(),
                state: Mutex::new(TickerState {
                    state: TimerState::Stopped,
                    interval: Duration::from_secs(1),
                    priority: DEFAULT_EVENT_PRIORITY,
                    fire_once: false,
                    thread: None,
                }),
            }),
            hooks,
        }
    }

    pub fn id(&self) -> TimerId {
        self.ticker.id
    }

    pub fn owner(&self) -> ServiceId {
        self.ticker.owner
    }

    pub fn state(&self) -> TimerState {
        self.ticker.state.lock().state
    }

    pub fn interval(&self) -> Duration {
        self.ticker.state.lock().interval
    }

    /// Allowed at any time, including while running.
    pub fn set_interval(&self, interval: Duration) {
        self.ticker.state.lock().interval = interval;
    }

    pub fn priority(&self) -> Priority {
        self.ticker.state.lock().priority
    }

    /// Allowed at any time, including while running.
    pub fn set_priority(&self, priority: Priority) {
        self.ticker.state.lock().priority = priority;
    }

    pub fn fire_once(&self) -> bool {
        self.ticker.state.lock().fire_once
    }

    pub fn set_fire_once(&self, fire_once: bool) {
        self.ticker.state.lock().fire_once = fire_once;
    }

    /// Install a synchronous callback. Only while stopped.
    pub fn set_callback(
        &self,
        callback: impl Fn(&DependencyManager) + 'static,
    ) -> Result<(), TimerError> {
        self.install_callback(TimerCallback::Sync(Rc::new(callback)))
    }

    /// Install an async callback, driven by the owning queue. Only while
    /// stopped.
    pub fn set_callback_async(
        &self,
        callback: impl Fn(DependencyManager) -> LocalBoxFuture<'static, ()> + 'static,
    ) -> Result<(), TimerError> {
        self.install_callback(TimerCallback::Async(Rc::new(callback)))
    }

    fn install_callback(&self, callback: TimerCallback) -> Result<(), TimerError> {
        if self.state() != TimerState::Stopped {
            return Err(TimerError::NotStopped);
        }
        *self.hooks.callback.borrow_mut() = callback;
        Ok(())
    }

    /// Start ticking; the first fire happens one interval from now.
    /// False if already starting or running.
    pub fn start(&self) -> bool {
        self.start_inner(false)
    }

    /// Start ticking with an immediate first fire.
    pub fn start_immediately(&self) -> bool {
        self.start_inner(true)
    }

    fn start_inner(&self, fire_immediately: bool) -> bool {
        debug_assert!(
            !matches!(&*self.hooks.callback.borrow(), TimerCallback::None),
            "timer started without a callback"
        );
        let previous = {
            let mut state = self.ticker.state.lock();
            if !matches!(state.state, TimerState::Stopped | TimerState::Stopping) {
                return false;
            }
            state.thread.take()
        };
        // Wait out a ticker still winding down before re-arming.
        if let Some(thread) = previous {
            let _ = thread.join();
        }
        let mut state = self.ticker.state.lock();
        if !matches!(state.state, TimerState::Stopped | TimerState::Stopping) {
            return false;
        }
        state.state = TimerState::Starting;
        self.hooks.quit_callbacks.borrow_mut().clear();
        let ticker = self.ticker.clone();
        let thread = std::thread::Builder::new()
            .name(format!("tmr#{}", self.ticker.id))
            .spawn(move || run_ticker(ticker, fire_immediately));
        match thread {
            Ok(handle) => {
                state.thread = Some(handle);
                tracing::trace!(timer = %self.ticker.id, owner = %self.ticker.owner, "timer started");
                true
            }
            Err(error) => {
                state.state = TimerState::Stopped;
                tracing::error!(timer = %self.ticker.id, %error, "failed to spawn ticker thread");
                false
            }
        }
    }

    /// Request a cooperative stop. True if the timer was running (or
    /// already stopping); the callback runs on the owning queue after
    /// the last tick is suppressed. When the timer is already stopped
    /// the callback runs immediately.
    pub fn stop_with_callback(&self, on_stopped: impl FnOnce() + 'static) -> bool {
        let mut state = self.ticker.state.lock();
        match state.state {
            TimerState::Running | TimerState::Stopping | TimerState::Starting => {
                self.hooks.quit_callbacks.borrow_mut().push(Box::new(on_stopped));
                state.state = TimerState::Stopping;
                true
            }
            TimerState::Stopped => {
                drop(state);
                on_stopped();
                false
            }
        }
    }

    /// As [`Timer::stop_with_callback`] without a callback.
    pub fn stop(&self) -> bool {
        let mut state = self.ticker.state.lock();
        match state.state {
            TimerState::Running | TimerState::Stopping | TimerState::Starting => {
                state.state = TimerState::Stopping;
                true
            }
            TimerState::Stopped => false,
        }
    }

}

impl Drop for Timer {
    fn drop(&mut self) {
        let thread = {
            let mut state = self.ticker.state.lock();
            if state.state == TimerState::Running || state.state == TimerState::Starting {
                state.state = TimerState::Stopping;
            }
            state.thread.take()
        };
        if let Some(thread) = thread {
            let _ = thread.join();
        }
        TIMERS.with(|registry| {
            registry.borrow_mut().remove(&self.ticker.id);
        });
    }
}

fn run_ticker(ticker: Arc<TickerShared>, fire_immediately: bool) {
    let id = ticker.id;
    let owner = ticker.owner;
    let mut next = Instant::now();
    {
        let mut state = ticker.state.lock();
        if state.state != TimerState::Starting {
            // Stopped before the thread came up.
            finish(&ticker);
            return;
        }
        state.state = TimerState::Running;
        if !fire_immediately {
            next += state.interval;
        }
    }

    loop {
        loop {
            let (current, interval) = {
                let state = ticker.state.lock();
                (state.state, state.interval)
            };
            if current != TimerState::Running {
                finish(&ticker);
                return;
            }
            let now = Instant::now();
            if now >= next {
                break;
            }
            let slice = (interval / 10).clamp(MIN_SLICE, MAX_SLICE).min(next - now);
            std::thread::sleep(slice);
        }

        let (priority, fire_once, interval) = {
            let state = ticker.state.lock();
            (state.priority, state.fire_once, state.interval)
        };
        ticker.queue.push_function_prioritised(owner, priority, move |dm| fire(dm, id));

        if fire_once {
            ticker.state.lock().state = TimerState::Stopping;
            finish(&ticker);
            return;
        }
        next += interval;
    }
}

/// Ticker exit: flip to stopped and hand the quit callbacks to the
/// owning queue.
fn finish(ticker: &Arc<TickerShared>) {
    let (id, owner, priority) = {
        let mut state = ticker.state.lock();
        state.state = TimerState::Stopped;
        (ticker.id, ticker.owner, state.priority)
    };
    ticker.queue.push_function_prioritised(owner, priority, move |dm| stopped(dm, id));
}

fn lookup(id: TimerId) -> Option<Rc<TimerHooks>> {
    TIMERS.with(|registry| registry.borrow().get(&id).and_then(Weak::upgrade))
}

/// Runs on the owning queue when a tick's run-function event dispatches.
fn fire(dm: &DependencyManager, id: TimerId) {
    let Some(hooks) = lookup(id) else { return };
    // Snapshot so a callback swap during async work stays safe.
    let callback = match &*hooks.callback.borrow() {
        TimerCallback::None => return,
        TimerCallback::Sync(f) => TimerCallback::Sync(f.clone()),
        TimerCallback::Async(f) => TimerCallback::Async(f.clone()),
    };
    match callback {
        TimerCallback::None => {}
        TimerCallback::Sync(f) => f(dm),
        TimerCallback::Async(f) => {
            let owner = ichor_runtime::current_service_id();
            let fut = f(dm.clone());
            let _ = dm.spawn(owner, fut);
        }
    }
}

/// Runs on the owning queue after the ticker exited.
fn stopped(_dm: &DependencyManager, id: TimerId) {
    let Some(hooks) = lookup(id) else { return };
    let callbacks: Vec<Box<dyn FnOnce()>> = hooks.quit_callbacks.borrow_mut().drain(..).collect();
    for callback in callbacks {
        callback();
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
