// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interface keys and dependency descriptors.
//!
//! An interface is a trait a service advertises itself under; the
//! resolver matches advertisements against declared dependencies purely
//! by [`InterfaceKey`]. Keys are derived from `TypeId`, which is the
//! stable per-process hash of the interface type.

use std::any::TypeId;
use std::fmt;

/// Stable key of an interface type, plus its name for diagnostics.
///
/// Obtain with `InterfaceKey::of::<dyn IMyInterface>()`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceKey {
    id: TypeId,
    name: &'static str,
}

impl InterfaceKey {
    pub fn of<I: ?Sized + 'static>() -> Self {
        InterfaceKey { id: TypeId::of::<I>(), name: std::any::type_name::<I>() }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for InterfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceKey({})", self.name)
    }
}

impl fmt::Display for InterfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Flags on a declared dependency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyFlags {
    /// The service cannot start (or stay active) without at least one
    /// provider of this interface.
    pub required: bool,
    /// Accept every matching provider instead of only the first.
    pub allow_multiple: bool,
}

impl DependencyFlags {
    pub const REQUIRED: DependencyFlags = DependencyFlags { required: true, allow_multiple: false };

    pub const OPTIONAL: DependencyFlags = DependencyFlags { required: false, allow_multiple: false };

    pub const fn with_allow_multiple(mut self) -> Self {
        self.allow_multiple = true;
        self
    }
}

/// A declared dependency and its current satisfaction count.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub interface: InterfaceKey,
    pub flags: DependencyFlags,
    /// Number of currently injected providers.
    pub satisfied: u32,
}

impl Dependency {
    pub fn new(interface: InterfaceKey, flags: DependencyFlags) -> Self {
        Dependency { interface, flags, satisfied: 0 }
    }

    /// A required dependency needs at least one provider; optional
    /// dependencies never block anything.
    pub fn is_satisfied(&self) -> bool {
        !self.flags.required || self.satisfied >= 1
    }

    /// Whether another provider may still be injected.
    pub fn accepts_more(&self) -> bool {
        self.flags.allow_multiple || self.satisfied == 0
    }
}

#[cfg(test)]
#[path = "dependency_tests.rs"]
mod tests;
