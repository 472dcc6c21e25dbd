// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ichor-timers: per-service timers on top of the Ichor runtime.
//!
//! One [`TimerFactoryFactory`] registered at startup tracks requests for
//! the [`TimerFactory`] interface and manufactures a private factory per
//! requesting service, filtered so nobody else can have it injected.
//! Each timer runs a helper thread that sleeps out the interval and
//! pushes run-function events at the timer's priority and owner id; the
//! callbacks themselves always execute on the owning queue thread.

mod factory;
mod factory_factory;
mod timer;

pub use factory::{TimerFactory, TimerFactoryService};
pub use factory_factory::{register_timer_factory_factory, TimerFactoryFactory};
pub use timer::Timer;
