// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle state machines for services and timers.

/// State of a service as tracked by its lifecycle manager.
///
/// The forward cycle is `Installed → Starting → Injecting → Active`; the
/// reverse cycle is `Active → Uninjecting → Stopping → Installed`.
/// `Uninstalled` is terminal: the lifecycle manager is destroyed after
/// reaching it. Transitions are performed only by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Uninstalled,
    Installed,
    Starting,
    Injecting,
    Active,
    Uninjecting,
    Stopping,
}

crate::simple_display! {
    ServiceState {
        Uninstalled => "uninstalled",
        Installed => "installed",
        Starting => "starting",
        Injecting => "injecting",
        Active => "active",
        Uninjecting => "uninjecting",
        Stopping => "stopping",
    }
}

impl ServiceState {
    /// True while the service participates in injection, i.e. between a
    /// successful start and the completion of its stop.
    pub fn is_live(self) -> bool {
        !matches!(self, ServiceState::Uninstalled | ServiceState::Installed)
    }
}

/// What a dependency change did to the observing service.
///
/// Returned by the lifecycle manager's online/offline walks so the
/// resolver knows which cascade event to push next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehaviour {
    /// Nothing further to do.
    Done,
    /// The service became startable; push a start event.
    Started,
    /// The service lost a required dependency; push a stop event.
    Stopped,
}

crate::simple_display! {
    StartBehaviour {
        Done => "done",
        Started => "started",
        Stopped => "stopped",
    }
}

/// State of a timer's ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

crate::simple_display! {
    TimerState {
        Stopped => "stopped",
        Starting => "starting",
        Running => "running",
        Stopping => "stopping",
    }
}
