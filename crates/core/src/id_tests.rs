// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashSet;

#[test]
fn service_ids_are_unique_and_increasing() {
    let a = ServiceId::next();
    let b = ServiceId::next();
    let c = ServiceId::next();
    assert!(a < b && b < c);
    assert!(!a.is_framework());
}

#[test]
fn framework_id_is_zero() {
    assert_eq!(ServiceId::FRAMEWORK.as_u64(), 0);
    assert!(ServiceId::FRAMEWORK.is_framework());
    assert_eq!(ServiceId::from_raw(0), ServiceId::FRAMEWORK);
}

#[test]
fn gids_are_distinct() {
    let mut seen = HashSet::new();
    for _ in 0..64 {
        assert!(seen.insert(ServiceGid::new().to_string()));
    }
}

#[test]
fn timer_ids_are_unique() {
    let a = TimerId::next();
    let b = TimerId::next();
    assert_ne!(a, b);
}

#[test]
fn event_id_orders_by_value() {
    assert!(EventId::from_raw(1) < EventId::from_raw(2));
    assert_eq!(EventId::from_raw(7).as_u64(), 7);
}

#[test]
fn display_is_plain_number() {
    assert_eq!(ServiceId::from_raw(42).to_string(), "42");
    assert_eq!(EventId::from_raw(9).to_string(), "9");
    assert_eq!(TaskId::from_raw(3).to_string(), "3");
}
