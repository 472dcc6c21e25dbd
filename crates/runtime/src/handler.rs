// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Erased handler, interceptor and completion-callback tables.
//!
//! Registration APIs on the dependency manager are typed; the dispatch
//! loop only ever sees the erased forms defined here. Entries are held
//! behind `Rc` so dispatch can snapshot a chain without keeping the
//! registry borrowed while user code runs.

use std::any::Any;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use ichor_core::EventMeta;

use crate::envelope::CallbackKey;

/// What a handler tells the dispatcher about the rest of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlow {
    /// Let later handlers see the event too.
    AllowOthers,
    /// Short-circuit the handler chain for this event.
    PreventOthers,
}

/// Verdict of a pre-interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptDecision {
    Proceed,
    /// Veto: no handler sees the event.
    Drop,
}

/// Marker type keying registrations that apply to every user event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllEvents;

impl ichor_core::Event for AllEvents {}

/// Per-registration dispatch filter, evaluated before the handler.
pub struct EventFilter {
    predicate: Box<dyn Fn(&EventMeta) -> bool>,
}

impl EventFilter {
    /// Only deliver events pushed by `origin`.
    pub fn origin(origin: ichor_core::ServiceId) -> Self {
        EventFilter { predicate: Box::new(move |meta| meta.origin == origin) }
    }

    /// Arbitrary predicate over the envelope metadata.
    pub fn custom(predicate: impl Fn(&EventMeta) -> bool + 'static) -> Self {
        EventFilter { predicate: Box::new(predicate) }
    }

    pub(crate) fn matches(&self, meta: &EventMeta) -> bool {
        (self.predicate)(meta)
    }
}

pub(crate) type ErasedHandlerFn =
    Box<dyn Fn(Rc<dyn Any>, EventMeta) -> LocalBoxFuture<'static, EventFlow>>;

pub(crate) struct HandlerEntry {
    pub key: CallbackKey,
    pub filter: Option<EventFilter>,
    pub invoke: ErasedHandlerFn,
}

pub(crate) type ErasedPreFn = Box<dyn Fn(&dyn Any, EventMeta) -> InterceptDecision>;
pub(crate) type ErasedPostFn = Box<dyn Fn(&dyn Any, EventMeta, bool)>;

pub(crate) struct InterceptorEntry {
    pub key: CallbackKey,
    pub pre: ErasedPreFn,
    pub post: ErasedPostFn,
}

/// Interceptor over every user event, payload unseen.
pub(crate) struct AllEventsInterceptorEntry {
    pub service: ichor_core::ServiceId,
    pub pre: Box<dyn Fn(EventMeta) -> InterceptDecision>,
    pub post: Box<dyn Fn(EventMeta, bool)>,
}

pub(crate) struct CompletionEntry {
    pub on_complete: Box<dyn Fn(EventMeta)>,
    pub on_error: Box<dyn Fn(EventMeta)>,
}
