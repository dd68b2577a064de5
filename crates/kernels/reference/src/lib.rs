//! Glimmer References
//!
//! Lazily evaluated, change-tracked values for the renderer. A
//! [`ReferenceGraph`] holds root values and memoized property paths below
//! them; reading a path resolves it against the current root value, and
//! computed properties flag themselves dirty when their dependencies are
//! notified.
//!
//! # Architecture
//!
//! - [`value`] - Dynamic values and identity-bearing objects
//! - [`reference`] - The [`Reference`] trait and the const, property and computed kinds
//! - [`meta`] - Per-object side table of property reference kinds
//! - [`graph`] - Arena of root and path references, subscriptions
//! - [`path`] - Dependency paths
//!
//! # Example
//!
//! ```
//! use glimmer_reference::{MetaRegistry, Object, ReferenceGraph, Value};
//!
//! let person = Object::from_props([("first", "Ada"), ("full", "Ada Lovelace")]);
//! let mut meta = MetaRegistry::new();
//! meta.register_computed(&person, "full", &["first"]).unwrap();
//!
//! let mut graph = ReferenceGraph::new();
//! let root = graph.root(Value::from(person.clone()));
//! let full = graph.get(root, "full");
//! assert_eq!(graph.value(full, &meta), Value::from("Ada Lovelace"));
//! assert!(!graph.is_dirty(full));
//!
//! person.set("first", "Grace");
//! let first = graph.get(root, "first");
//! graph.notify(first);
//! assert!(graph.is_dirty(full));
//! ```

pub mod error;
pub mod graph;
pub mod meta;
pub mod path;
pub mod reference;
pub mod value;

pub use error::{ReferenceError, Result};
pub use graph::{InnerId, RefId, ReferenceGraph};
pub use meta::{MetaRegistry, ReferenceFactory, ReferenceKind};
pub use path::Path;
pub use reference::{
    ComputedReference, ComputedState, ConstReference, PropertyReference, Reference,
};
pub use value::{Object, ObjectId, Value};
