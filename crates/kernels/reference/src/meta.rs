//! Per-object reference metadata.
//!
//! [`MetaRegistry`] is a side table keyed by [`ObjectId`] that records which
//! [`ReferenceKind`] a property is read through. Properties without an entry
//! are plain [`PropertyReference`](crate::PropertyReference)s. The registry
//! is owned by the caller and passed into
//! [`ReferenceGraph::value`](crate::ReferenceGraph::value) explicitly.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{ReferenceError, Result};
use crate::path::Path;
use crate::reference::Reference;
use crate::value::{Object, ObjectId, Value};

/// Builds a custom inner reference for `parent[property]`.
pub trait ReferenceFactory {
    fn create(&self, parent: &Value, property: &str) -> Box<dyn Reference<Value>>;
}

impl<F> ReferenceFactory for F
where
    F: Fn(&Value, &str) -> Box<dyn Reference<Value>>,
{
    fn create(&self, parent: &Value, property: &str) -> Box<dyn Reference<Value>> {
        self(parent, property)
    }
}

/// How a property is read.
#[derive(Clone)]
pub enum ReferenceKind {
    Property,
    Computed { dependencies: Vec<Path> },
    Custom(Rc<dyn ReferenceFactory>),
}

impl fmt::Debug for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Property => write!(f, "Property"),
            ReferenceKind::Computed { dependencies } => f
                .debug_struct("Computed")
                .field("dependencies", dependencies)
                .finish(),
            ReferenceKind::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[derive(Debug, Default)]
pub struct MetaRegistry {
    kinds: HashMap<ObjectId, HashMap<String, ReferenceKind>>,
}

impl MetaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `object[property]` as computed from `dependencies`.
    ///
    /// # Errors
    ///
    /// Fails if the object lacks the property, a dependency path is malformed,
    /// or the property lists itself as a dependency.
    pub fn register_computed(
        &mut self,
        object: &Object,
        property: &str,
        dependencies: &[&str],
    ) -> Result<()> {
        if !object.has(property) {
            return Err(ReferenceError::UnknownProperty {
                object: object.id(),
                property: property.to_string(),
            });
        }
        let dependencies = dependencies
            .iter()
            .map(|dependency| Path::parse(dependency))
            .collect::<Result<Vec<_>>>()?;
        if dependencies
            .iter()
            .any(|path| path.len() == 1 && path.head() == property)
        {
            return Err(ReferenceError::SelfDependency {
                property: property.to_string(),
            });
        }

        debug!(
            object = %object.id(),
            property,
            dependencies = dependencies.len(),
            "computed registered"
        );
        self.insert(object, property, ReferenceKind::Computed { dependencies });
        Ok(())
    }

    /// Read `object[property]` through references built by `factory`.
    pub fn register_custom(
        &mut self,
        object: &Object,
        property: &str,
        factory: impl ReferenceFactory + 'static,
    ) {
        debug!(object = %object.id(), property, "custom reference registered");
        self.insert(object, property, ReferenceKind::Custom(Rc::new(factory)));
    }

    fn insert(&mut self, object: &Object, property: &str, kind: ReferenceKind) {
        self.kinds
            .entry(object.id())
            .or_default()
            .insert(property.to_string(), kind);
    }

    /// Kind to read `parent[property]` through. Non-objects and unregistered
    /// properties are plain properties.
    pub fn kind_for(&self, parent: &Value, property: &str) -> ReferenceKind {
        parent
            .as_object()
            .and_then(|object| self.kinds.get(&object.id()))
            .and_then(|properties| properties.get(property))
            .cloned()
            .unwrap_or(ReferenceKind::Property)
    }

    /// Drop every entry of an object that is no longer in use.
    pub fn forget(&mut self, object: ObjectId) {
        self.kinds.remove(&object);
    }

    /// Number of objects with registered metadata.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
