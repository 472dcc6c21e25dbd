// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dependency manager tests, driven by a synchronous pump instead of a
//! running loop: events are popped and dispatched inline until the
//! queue is idle, which keeps every scenario deterministic.

use super::*;
use crate::handler::{EventFlow, InterceptDecision};
use crate::queue::PriorityQueue;
use crate::test_support::{
    register_counting_consumer, register_flaky, register_gated, register_mix, register_mix_check,
    register_quit_on_start, register_useless, Probe,
};
use ichor_core::test_support::{CountedEvent, TestEvent};
use ichor_core::{DependencyFlags, ServiceState};

fn pump(queue: &PriorityQueue, dm: &DependencyManager) {
    let handle = queue.handle();
    while let Some(envelope) = handle.try_pop() {
        dm.process_event(envelope);
    }
}

fn setup() -> (PriorityQueue, DependencyManager) {
    let queue = PriorityQueue::new();
    let dm = queue.create_manager();
    (queue, dm)
}

#[test]
fn required_dependency_starts_consumer() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let provider = register_useless(&dm).unwrap();
    let consumer = register_counting_consumer(&dm, DependencyFlags::REQUIRED, probe.clone()).unwrap();
    pump(&queue, &dm);

    assert_eq!(dm.get_service_state(provider.id()), Some(ServiceState::Active));
    assert_eq!(dm.get_service_state(consumer.id()), Some(ServiceState::Active));
    assert_eq!(probe.adds(), 1);
    assert_eq!(probe.removes(), 0);

    let _ = provider.detach();
    let _ = consumer.detach();
}

#[test]
fn consumer_waits_for_required_provider() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let consumer = register_counting_consumer(&dm, DependencyFlags::REQUIRED, probe.clone()).unwrap();
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(consumer.id()), Some(ServiceState::Installed));

    // Provider arrives later; the resolver starts the waiting consumer.
    let provider = register_useless(&dm).unwrap();
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(consumer.id()), Some(ServiceState::Active));
    assert_eq!(probe.adds(), 1);

    let _ = provider.detach();
    let _ = consumer.detach();
}

#[test]
fn late_consumer_binds_to_already_active_provider() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let provider = register_useless(&dm).unwrap();
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(provider.id()), Some(ServiceState::Active));

    let consumer = register_counting_consumer(&dm, DependencyFlags::REQUIRED, probe.clone()).unwrap();
    pump(&queue, &dm);

    assert_eq!(dm.get_service_state(consumer.id()), Some(ServiceState::Active));
    assert_eq!(probe.adds(), 1);

    let _ = provider.detach();
    let _ = consumer.detach();
}

#[test]
fn optional_dependency_does_not_block_start() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let consumer = register_counting_consumer(&dm, DependencyFlags::OPTIONAL, probe.clone()).unwrap();
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(consumer.id()), Some(ServiceState::Active));
    assert_eq!(probe.adds(), 0);
    let _ = consumer.detach();
}

#[test]
fn stopping_provider_stops_required_consumer() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let provider = register_useless(&dm).unwrap();
    let consumer = register_counting_consumer(&dm, DependencyFlags::REQUIRED, probe.clone()).unwrap();
    pump(&queue, &dm);

    queue.handle().push_stop_service(ServiceId::FRAMEWORK, provider.id());
    pump(&queue, &dm);

    assert_eq!(dm.get_service_state(provider.id()), Some(ServiceState::Installed));
    assert_eq!(dm.get_service_state(consumer.id()), Some(ServiceState::Installed));
    assert_eq!(probe.adds(), 1);
    assert_eq!(probe.removes(), 1);

    let _ = provider.detach();
    let _ = consumer.detach();
}

#[test]
fn allow_multiple_keeps_consumer_active_with_one_provider_left() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let first = register_useless(&dm).unwrap();
    let second = register_useless(&dm).unwrap();
    let consumer = register_counting_consumer(
        &dm,
        DependencyFlags::REQUIRED.with_allow_multiple(),
        probe.clone(),
    )
    .unwrap();
    pump(&queue, &dm);
    assert_eq!(probe.adds(), 2);
    assert_eq!(probe.injected(), 2);

    queue.handle().push_stop_service(ServiceId::FRAMEWORK, second.id());
    pump(&queue, &dm);

    assert_eq!(dm.get_service_state(consumer.id()), Some(ServiceState::Active));
    assert_eq!(probe.removes(), 1);
    assert_eq!(probe.injected(), 1);

    let _ = first.detach();
    let _ = second.detach();
    let _ = consumer.detach();
}

#[test]
fn failed_start_returns_to_installed_until_retried() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let flaky = register_flaky(&dm, probe.clone()).unwrap();
    pump(&queue, &dm);

    assert_eq!(probe.starts(), 1);
    assert_eq!(dm.get_service_state(flaky.id()), Some(ServiceState::Installed));

    // No automatic retry: a second start event is required.
    queue.handle().push_start_service(ServiceId::FRAMEWORK, flaky.id());
    pump(&queue, &dm);
    assert_eq!(probe.starts(), 2);
    assert_eq!(dm.get_service_state(flaky.id()), Some(ServiceState::Active));

    let _ = flaky.detach();
}

#[test]
fn removal_balances_injections() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let provider = register_useless(&dm).unwrap();
    let consumer = register_counting_consumer(&dm, DependencyFlags::REQUIRED, probe.clone()).unwrap();
    pump(&queue, &dm);
    assert_eq!(probe.adds(), 1);

    // Removing the consumer releases its injected provider.
    queue.handle().push_remove_service(ServiceId::FRAMEWORK, consumer.id());
    pump(&queue, &dm);

    assert_eq!(probe.removes(), 1);
    assert_eq!(dm.get_service_state(consumer.id()), None);
    assert_eq!(dm.service_count(), 1);

    let _ = provider.detach();
    let _ = consumer.detach();
}

#[test]
fn stop_of_an_installed_service_is_a_no_op() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    // Required dependency missing: stays installed.
    let consumer = register_counting_consumer(&dm, DependencyFlags::REQUIRED, probe.clone()).unwrap();
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(consumer.id()), Some(ServiceState::Installed));

    queue.handle().push_stop_service(ServiceId::FRAMEWORK, consumer.id());
    queue.handle().push_stop_service(ServiceId::FRAMEWORK, consumer.id());
    pump(&queue, &dm);

    // No transition and no callbacks from redundant stops.
    assert_eq!(dm.get_service_state(consumer.id()), Some(ServiceState::Installed));
    assert_eq!(probe.removes(), 0);

    let _ = consumer.detach();
}

#[test]
fn duplicate_interface_is_rejected() {
    let (_queue, dm) = setup();
    let result = dm
        .service_builder::<crate::test_support::MixService>()
        .implements::<dyn crate::test_support::IMixOne>(|svc| svc)
        .implements::<dyn crate::test_support::IMixOne>(|svc| svc)
        .register(|cx| crate::test_support::MixService::new(cx));
    assert!(matches!(result, Err(ichor_core::ResolverError::DuplicateInterface { .. })));
}

#[test]
fn mixed_interfaces_resolve_to_one_peer() {
    let (queue, dm) = setup();
    let mix = register_mix(&dm).unwrap();
    let (check, flags) = register_mix_check(&dm).unwrap();
    pump(&queue, &dm);

    assert_eq!(dm.get_service_state(check.id()), Some(ServiceState::Active));
    assert!(flags.same_peer.load(std::sync::atomic::Ordering::SeqCst));
    assert!(flags.distinct_values.load(std::sync::atomic::Ordering::SeqCst));

    let _ = mix.detach();
    let _ = check.detach();
}

#[test]
fn started_services_returns_typed_handles() {
    let (queue, dm) = setup();
    let a = register_useless(&dm).unwrap();
    let b = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let started = dm.started_services::<dyn crate::test_support::IUseless>();
    assert_eq!(started.len(), 2);
    let ids: Vec<ServiceId> = started.iter().map(|svc| svc.useless_id()).collect();
    assert_eq!(ids, vec![a.id(), b.id()]);

    let _ = a.detach();
    let _ = b.detach();
}

#[test]
fn handlers_receive_events_in_registration_order() {
    let (queue, dm) = setup();
    let listener = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let first = {
        let seen = seen.clone();
        dm.register_event_handler::<CountedEvent, _, _>(listener.id(), move |event, _meta| {
            let seen = seen.clone();
            async move {
                seen.borrow_mut().push(("first", event.seq));
                EventFlow::AllowOthers
            }
        })
    };
    let second = {
        let seen = seen.clone();
        dm.register_event_handler::<CountedEvent, _, _>(listener.id(), move |event, _meta| {
            let seen = seen.clone();
            async move {
                seen.borrow_mut().push(("second", event.seq));
                EventFlow::AllowOthers
            }
        })
    };

    queue.handle().push_event(ServiceId::FRAMEWORK, CountedEvent::new(9));
    pump(&queue, &dm);
    assert_eq!(*seen.borrow(), vec![("first", 9), ("second", 9)]);

    drop(first);
    drop(second);
    let _ = listener.detach();
}

#[test]
fn prevent_others_short_circuits_the_chain() {
    let (queue, dm) = setup();
    let listener = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let calls = Rc::new(std::cell::Cell::new(0u32));
    let _first = {
        let calls = calls.clone();
        dm.register_event_handler::<TestEvent, _, _>(listener.id(), move |_event, _meta| {
            let calls = calls.clone();
            async move {
                calls.set(calls.get() + 1);
                EventFlow::PreventOthers
            }
        })
    };
    let _second = {
        let calls = calls.clone();
        dm.register_event_handler::<TestEvent, _, _>(listener.id(), move |_event, _meta| {
            let calls = calls.clone();
            async move {
                calls.set(calls.get() + 100);
                EventFlow::AllowOthers
            }
        })
    };

    queue.handle().push_event(ServiceId::FRAMEWORK, TestEvent);
    pump(&queue, &dm);
    assert_eq!(calls.get(), 1);

    let _ = listener.detach();
}

#[test]
fn origin_filter_drops_foreign_events() {
    let (queue, dm) = setup();
    let listener = register_useless(&dm).unwrap();
    let other = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let count = Rc::new(std::cell::Cell::new(0u32));
    let _reg = {
        let count = count.clone();
        dm.register_event_handler_filtered::<TestEvent, _, _>(
            listener.id(),
            crate::handler::EventFilter::origin(other.id()),
            move |_event, _meta| {
                let count = count.clone();
                async move {
                    count.set(count.get() + 1);
                    EventFlow::AllowOthers
                }
            },
        )
    };

    queue.handle().push_event(ServiceId::FRAMEWORK, TestEvent);
    queue.handle().push_event(other.id(), TestEvent);
    pump(&queue, &dm);
    assert_eq!(count.get(), 1);

    let _ = listener.detach();
    let _ = other.detach();
}

#[test]
fn interceptor_veto_suppresses_handlers() {
    let (queue, dm) = setup();
    let listener = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let handled = Rc::new(std::cell::Cell::new(false));
    let post_flags = Rc::new(std::cell::RefCell::new(Vec::new()));
    let _handler = {
        let handled = handled.clone();
        dm.register_event_handler::<TestEvent, _, _>(listener.id(), move |_event, _meta| {
            let handled = handled.clone();
            async move {
                handled.set(true);
                EventFlow::AllowOthers
            }
        })
    };
    let _interceptor = {
        let post_flags = post_flags.clone();
        dm.register_event_interceptor::<TestEvent>(
            listener.id(),
            |_event, _meta| InterceptDecision::Drop,
            move |_event, _meta, was_handled| post_flags.borrow_mut().push(was_handled),
        )
    };

    queue.handle().push_event(ServiceId::FRAMEWORK, TestEvent);
    pump(&queue, &dm);

    assert!(!handled.get());
    assert_eq!(*post_flags.borrow(), vec![false]);

    let _ = listener.detach();
}

#[test]
fn dropping_a_registration_unregisters_the_handler() {
    let (queue, dm) = setup();
    let listener = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let count = Rc::new(std::cell::Cell::new(0u32));
    let registration = {
        let count = count.clone();
        dm.register_event_handler::<TestEvent, _, _>(listener.id(), move |_event, _meta| {
            let count = count.clone();
            async move {
                count.set(count.get() + 1);
                EventFlow::AllowOthers
            }
        })
    };

    queue.handle().push_event(ServiceId::FRAMEWORK, TestEvent);
    pump(&queue, &dm);
    assert_eq!(count.get(), 1);

    drop(registration);
    queue.handle().push_event(ServiceId::FRAMEWORK, TestEvent);
    pump(&queue, &dm);
    assert_eq!(count.get(), 1);

    let _ = listener.detach();
}

#[test]
fn completion_callbacks_fire_for_do_work() {
    let (queue, dm) = setup();
    let origin = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let completions = Rc::new(std::cell::Cell::new(0u32));
    let _reg = {
        let completions = completions.clone();
        dm.register_completion_callbacks::<crate::envelope::DoWorkEvent>(
            origin.id(),
            move |_meta| completions.set(completions.get() + 1),
            |_meta| {},
        )
    };

    queue.handle().push_do_work(origin.id());
    queue.handle().push_do_work(ServiceId::FRAMEWORK);
    pump(&queue, &dm);
    assert_eq!(completions.get(), 1);

    let _ = origin.detach();
}

trait IScoped {}

struct ScopedConsumer {
    #[allow(dead_code)]
    cx: ServiceCtx,
}

impl Service for ScopedConsumer {}

impl Inject<dyn IScoped> for ScopedConsumer {
    fn on_add(&self, _implementation: Rc<dyn IScoped>, _peer: &ServiceRef) {}
    fn on_remove(&self, _implementation: Rc<dyn IScoped>, _peer: &ServiceRef) {}
}

#[test]
fn tracker_receives_request_properties() {
    let (queue, dm) = setup();
    let host = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let _registration = {
        let seen = seen.clone();
        dm.register_dependency_tracker::<dyn IScoped, _, _, _, _>(
            host.id(),
            move |_dm, request| {
                let seen = seen.clone();
                async move {
                    let size = request
                        .properties
                        .as_ref()
                        .and_then(|props| props.get::<u64>("scope_size").copied());
                    seen.borrow_mut().push((request.requester, size));
                }
            },
            |_dm, _request| async move {},
        )
    };

    let consumer = dm
        .service_builder::<ScopedConsumer>()
        .depends_on_with_properties::<dyn IScoped>(
            DependencyFlags::OPTIONAL,
            Properties::new().with("scope_size", 8u64),
        )
        .register(|cx| ScopedConsumer { cx })
        .unwrap();
    pump(&queue, &dm);

    assert_eq!(*seen.borrow(), vec![(consumer.id(), Some(8u64))]);

    let _ = host.detach();
    let _ = consumer.detach();
}

#[test]
fn suspended_start_resumes_via_continuation() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let gated = register_gated(&dm, probe.clone()).unwrap();
    pump(&queue, &dm);

    // Start ran up to its first suspension point and parked.
    assert_eq!(probe.starts(), 1);
    assert_eq!(dm.get_service_state(gated.id()), Some(ServiceState::Starting));

    let id = gated.id();
    queue.handle().push_function(ServiceId::FRAMEWORK, move |dm| {
        if let Some(service) = dm.get_service::<crate::test_support::GatedService>(id) {
            service.release();
        }
    });
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(gated.id()), Some(ServiceState::Active));

    let _ = gated.detach();
}

#[test]
fn suspended_stop_resumes_via_continuation() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let gated = register_gated(&dm, probe.clone()).unwrap();
    pump(&queue, &dm);

    let id = gated.id();
    queue.handle().push_function(ServiceId::FRAMEWORK, move |dm| {
        if let Some(service) = dm.get_service::<crate::test_support::GatedService>(id) {
            service.release();
        }
    });
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(gated.id()), Some(ServiceState::Active));

    queue.handle().push_stop_service(ServiceId::FRAMEWORK, gated.id());
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(gated.id()), Some(ServiceState::Stopping));
    assert_eq!(probe.stops(), 0);

    queue.handle().push_function(ServiceId::FRAMEWORK, move |dm| {
        if let Some(service) = dm.get_service::<crate::test_support::GatedService>(id) {
            service.release();
        }
    });
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(gated.id()), Some(ServiceState::Installed));
    assert_eq!(probe.stops(), 1);

    let _ = gated.detach();
}

#[test]
fn spawned_task_completes_with_its_value() {
    let (_queue, dm) = setup();
    let mut task = Box::pin(dm.spawn(ServiceId::FRAMEWORK, async { 40 + 2 }));
    assert!(task.is_done());

    use futures_util::task::noop_waker_ref;
    use std::task::{Context, Poll};
    match task.as_mut().poll(&mut Context::from_waker(noop_waker_ref())) {
        Poll::Ready(Ok(value)) => assert_eq!(value, 42),
        other => panic!("unexpected task result: {other:?}"),
    }
}

#[test]
fn all_events_interceptor_observes_every_user_event() {
    let (queue, dm) = setup();
    let listener = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let observed = Rc::new(std::cell::Cell::new(0u32));
    let _reg = {
        let observed = observed.clone();
        dm.register_all_events_interceptor(
            listener.id(),
            move |_meta| {
                observed.set(observed.get() + 1);
                InterceptDecision::Proceed
            },
            |_meta, _handled| {},
        )
    };

    queue.handle().push_event(ServiceId::FRAMEWORK, TestEvent);
    queue.handle().push_event(ServiceId::FRAMEWORK, CountedEvent::new(1));
    pump(&queue, &dm);
    assert_eq!(observed.get(), 2);

    let _ = listener.detach();
}

#[test]
fn recoverable_errors_reach_subscribed_handlers() {
    let (queue, dm) = setup();
    let listener = register_useless(&dm).unwrap();
    pump(&queue, &dm);

    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let _reg = {
        let seen = seen.clone();
        dm.register_event_handler::<ichor_core::RecoverableErrorEvent, _, _>(
            listener.id(),
            move |event, _meta| {
                let seen = seen.clone();
                async move {
                    seen.borrow_mut().push((event.error_kind, event.message.clone()));
                    EventFlow::AllowOthers
                }
            },
        )
    };

    queue.handle().push_event(
        listener.id(),
        ichor_core::RecoverableErrorEvent { error_kind: 7, message: "connection reset".into() },
    );
    pump(&queue, &dm);
    assert_eq!(*seen.borrow(), vec![(7, String::from("connection reset"))]);

    let _ = listener.detach();
}

#[test]
fn unknown_service_stop_is_unrecoverable_and_shuts_down() {
    let (queue, dm) = setup();
    let survivor = register_useless(&dm).unwrap().detach();
    pump(&queue, &dm);
    assert_eq!(dm.get_service_state(survivor), Some(ServiceState::Active));

    queue.handle().push_stop_service(ServiceId::FRAMEWORK, ServiceId::from_raw(u64::MAX));
    pump(&queue, &dm);

    // The violation cascaded into a full quit: nothing is left.
    assert_eq!(dm.service_count(), 0);
    assert!(queue.handle().is_empty());
}

#[test]
fn quit_on_start_drains_everything() {
    let (queue, dm) = setup();
    let probe = Probe::new();
    let provider = register_useless(&dm).unwrap().detach();
    let quitter = register_quit_on_start(&dm, probe.clone()).unwrap().detach();
    let _ = (provider, quitter);
    pump(&queue, &dm);

    assert_eq!(probe.starts(), 1);
    assert_eq!(probe.adds(), 1);
    assert_eq!(probe.removes(), 1);
    assert_eq!(dm.service_count(), 0);
    assert!(queue.handle().is_empty());
}
