// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution scope: which service the loop is currently running.
//!
//! Purely diagnostic. The dispatch loop pins the id of the service whose
//! handler, lifecycle method or timer callback is executing; log lines
//! and hardening asserts read it back. User code should pass handles
//! explicitly instead of relying on this.

use std::cell::Cell;

use ichor_core::ServiceId;

thread_local! {
    static CURRENT_SERVICE: Cell<ServiceId> = const { Cell::new(ServiceId::FRAMEWORK) };
}

/// Id of the service currently executing on this thread.
/// `ServiceId::FRAMEWORK` outside any service scope.
pub fn current_service_id() -> ServiceId {
    CURRENT_SERVICE.with(Cell::get)
}

/// RAII guard restoring the previous scope on drop.
pub(crate) struct ScopeGuard {
    previous: ServiceId,
}

impl ScopeGuard {
    pub(crate) fn enter(service: ServiceId) -> Self {
        let previous = CURRENT_SERVICE.with(|cell| cell.replace(service));
        ScopeGuard { previous }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        CURRENT_SERVICE.with(|cell| cell.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_nest_and_restore() {
        assert_eq!(current_service_id(), ServiceId::FRAMEWORK);
        let outer = ServiceId::next();
        let inner = ServiceId::next();
        {
            let _a = ScopeGuard::enter(outer);
            assert_eq!(current_service_id(), outer);
            {
                let _b = ScopeGuard::enter(inner);
                assert_eq!(current_service_id(), inner);
            }
            assert_eq!(current_service_id(), outer);
        }
        assert_eq!(current_service_id(), ServiceId::FRAMEWORK);
    }
}
