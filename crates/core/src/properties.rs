// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service properties: an insertion-ordered map from string keys to
//! dynamically typed values. Values are `Send + Sync` so request
//! properties can travel inside queued events.
//!
//! Properties are attached to a service at creation and may be mutated
//! only by that service. The runtime itself reads one well-known entry,
//! [`FILTER_PROPERTY`], which restricts the consumers a provider may be
//! injected into.

use std::any::Any;
use std::fmt;

use indexmap::IndexMap;

use crate::id::ServiceId;

/// Key under which a provider stores its [`ServiceIdFilter`].
pub const FILTER_PROPERTY: &str = "Filter";

/// A dynamically typed property value with a checked downcast.
pub struct PropertyValue {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl PropertyValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        PropertyValue { value: Box::new(value), type_name: std::any::type_name::<T>() }
    }

    /// The type name the value was stored under, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Typed access; `None` if the stored value is of a different type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut::<T>()
    }
}

// Debug can't show the erased value, only its recorded type.
impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyValue<{}>", self.type_name)
    }
}

/// Insertion-ordered string-keyed property map.
#[derive(Debug, Default)]
pub struct Properties {
    entries: IndexMap<String, PropertyValue>,
}

impl Properties {
    pub fn new() -> Self {
        Properties { entries: IndexMap::new() }
    }

    /// Builder-style insert, for constructing property sets inline.
    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), PropertyValue::new(value));
    }

    /// Typed lookup; `None` when the key is absent or the type differs.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key)?.downcast_ref::<T>()
    }

    pub fn get_value(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The provider-side injection filter, if one is set.
    pub fn filter(&self) -> Option<&ServiceIdFilter> {
        self.get::<ServiceIdFilter>(FILTER_PROPERTY)
    }
}

/// Restricts injection of a provider to a single consumer service.
///
/// Stored under [`FILTER_PROPERTY`] in the provider's properties; the
/// resolver skips every other consumer during its online/offline scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceIdFilter(pub ServiceId);

impl ServiceIdFilter {
    pub fn allows(&self, consumer: ServiceId) -> bool {
        self.0 == consumer
    }
}

#[cfg(test)]
#[path = "properties_tests.rs"]
mod tests;
