// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

trait IAlpha {}
trait IBeta {}

#[test]
fn keys_are_stable_per_interface() {
    assert_eq!(InterfaceKey::of::<dyn IAlpha>(), InterfaceKey::of::<dyn IAlpha>());
    assert_ne!(InterfaceKey::of::<dyn IAlpha>(), InterfaceKey::of::<dyn IBeta>());
}

#[test]
fn key_carries_type_name() {
    let key = InterfaceKey::of::<dyn IAlpha>();
    assert!(key.name().contains("IAlpha"));
    assert!(format!("{key:?}").contains("IAlpha"));
}

#[parameterized(
    required_unsatisfied = { DependencyFlags::REQUIRED, 0, false },
    required_satisfied = { DependencyFlags::REQUIRED, 1, true },
    required_multi = { DependencyFlags::REQUIRED.with_allow_multiple(), 0, false },
    required_multi_one = { DependencyFlags::REQUIRED.with_allow_multiple(), 1, true },
    optional_empty = { DependencyFlags::OPTIONAL, 0, true },
)]
fn satisfaction(flags: DependencyFlags, satisfied: u32, expected: bool) {
    let mut dep = Dependency::new(InterfaceKey::of::<dyn IAlpha>(), flags);
    dep.satisfied = satisfied;
    assert_eq!(dep.is_satisfied(), expected);
}

#[test]
fn single_dependency_accepts_only_one_provider() {
    let mut dep = Dependency::new(InterfaceKey::of::<dyn IAlpha>(), DependencyFlags::REQUIRED);
    assert!(dep.accepts_more());
    dep.satisfied = 1;
    assert!(!dep.accepts_more());
}

#[test]
fn multi_dependency_keeps_accepting() {
    let mut dep = Dependency::new(
        InterfaceKey::of::<dyn IAlpha>(),
        DependencyFlags::OPTIONAL.with_allow_multiple(),
    );
    dep.satisfied = 5;
    assert!(dep.accepts_more());
}
