// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wakers that re-enter the event loop.
//!
//! Waking a parked coroutine means pushing a `Continuable` (or
//! `ContinuableStart`) event carrying the task id. The event inherits
//! the `(service id, priority)` recorded when the coroutine was parked,
//! so resumption competes with other work under the service's own
//! priority. Wakers may fire from any thread; the push side of the
//! queue is the only thing they touch.

use std::sync::Arc;
use std::task::Waker;

use futures_util::task::{self, ArcWake};

use ichor_core::{Priority, ServiceId, TaskId};

use crate::envelope::FrameworkEvent;
use crate::queue::Queue;

pub(crate) struct QueueWaker {
    queue: Queue,
    task: TaskId,
    service: ServiceId,
    priority: Priority,
    start_kind: bool,
}

impl ArcWake for QueueWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let event = if arc_self.start_kind {
            FrameworkEvent::ContinuableStart { task: arc_self.task }
        } else {
            FrameworkEvent::Continuable { task: arc_self.task }
        };
        arc_self.queue.push_framework(arc_self.service, arc_self.priority, event);
    }
}

pub(crate) fn continuation_waker(
    queue: Queue,
    task: TaskId,
    service: ServiceId,
    priority: Priority,
    start_kind: bool,
) -> Waker {
    task::waker(Arc::new(QueueWaker { queue, task, service, priority, start_kind }))
}
