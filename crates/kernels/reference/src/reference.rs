//! Reference kinds.
//!
//! A reference produces a value on demand and reports whether the value it
//! would produce may have changed since it was last read.

use tracing::trace;

use crate::path::Path;
use crate::value::{Object, Value};

/// A lazily evaluated value source.
pub trait Reference<T> {
    /// Produce the current value.
    fn value(&mut self) -> T;

    /// Whether the next [`value`](Reference::value) may differ from the last one.
    fn is_dirty(&self) -> bool;
}

/// A value known never to change.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstReference<T> {
    inner: T,
}

impl<T: Clone> ConstReference<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: Clone> Reference<T> for ConstReference<T> {
    fn value(&mut self) -> T {
        self.inner.clone()
    }

    fn is_dirty(&self) -> bool {
        false
    }
}

/// Re-reads `parent[property]` on every access.
#[derive(Debug, Clone)]
pub struct PropertyReference {
    parent: Value,
    property: String,
}

impl PropertyReference {
    pub fn new(parent: Value, property: impl Into<String>) -> Self {
        Self {
            parent,
            property: property.into(),
        }
    }

    pub fn property(&self) -> &str {
        &self.property
    }
}

impl Reference<Value> for PropertyReference {
    fn value(&mut self) -> Value {
        self.parent.get_property(&self.property)
    }

    fn is_dirty(&self) -> bool {
        true
    }
}

/// Installation state of a [`ComputedReference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    Uninstalled,
    Installed,
}

/// A property whose recomputation is driven by declared dependencies.
///
/// The first read through a [`ReferenceGraph`](crate::ReferenceGraph)
/// installs it: every dependency path is resolved from the owning object's
/// root and subscribed to. Afterwards it stays clean until notified.
#[derive(Debug, Clone)]
pub struct ComputedReference {
    object: Object,
    property: String,
    dependencies: Vec<Path>,
    state: ComputedState,
    dirty: bool,
}

impl ComputedReference {
    pub fn new(object: Object, property: impl Into<String>, dependencies: Vec<Path>) -> Self {
        Self {
            object,
            property: property.into(),
            dependencies,
            state: ComputedState::Uninstalled,
            dirty: true,
        }
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn dependencies(&self) -> &[Path] {
        &self.dependencies
    }

    pub fn state(&self) -> ComputedState {
        self.state
    }

    pub(crate) fn mark_installed(&mut self) {
        trace!(object = %self.object.id(), property = %self.property, "computed installed");
        self.state = ComputedState::Installed;
    }

    /// Flag the next read as a recomputation.
    pub fn notify(&mut self) {
        if self.state == ComputedState::Installed && !self.dirty {
            trace!(object = %self.object.id(), property = %self.property, "computed notified");
        }
        self.dirty = true;
    }
}

impl Reference<Value> for ComputedReference {
    fn value(&mut self) -> Value {
        self.dirty = false;
        self.object.get(&self.property)
    }

    fn is_dirty(&self) -> bool {
        self.state == ComputedState::Uninstalled || self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_reference_never_dirty() {
        let mut reference = ConstReference::new(Value::from("fixed"));
        assert!(!reference.is_dirty());
        assert_eq!(reference.value(), Value::from("fixed"));
        assert_eq!(reference.value(), Value::from("fixed"));
        assert!(!reference.is_dirty());
    }

    #[test]
    fn test_property_reference_rereads() {
        let object = Object::from_props([("count", 1)]);
        let mut reference = PropertyReference::new(Value::from(object.clone()), "count");
        assert_eq!(reference.value(), Value::from(1));
        object.set("count", 2);
        assert_eq!(reference.value(), Value::from(2));
        assert!(reference.is_dirty());
    }

    #[test]
    fn test_computed_dirty_until_read() {
        let object = Object::from_props([("full", "a b")]);
        let mut reference = ComputedReference::new(object, "full", vec![]);
        assert!(reference.is_dirty());

        reference.mark_installed();
        assert_eq!(reference.value(), Value::from("a b"));
        assert!(!reference.is_dirty());

        reference.notify();
        assert!(reference.is_dirty());
        assert_eq!(reference.value(), Value::from("a b"));
        assert!(!reference.is_dirty());
    }
}
