//! Reference layer errors.
//!
//! Missing data is never an error: resolving a path through absent or null
//! values yields [`Value::Undefined`](crate::Value::Undefined). Errors cover
//! structurally invalid requests only.

use thiserror::Error;

use crate::graph::RefId;
use crate::value::ObjectId;

/// Reference result type alias.
pub type Result<T> = std::result::Result<T, ReferenceError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    /// A dependency path with no segments.
    #[error("dependency path is empty")]
    EmptyPath,

    /// A dependency path such as `a..b` with an empty segment.
    #[error("dependency path '{path}' has an empty segment")]
    EmptySegment { path: String },

    /// A computed property declared as depending on itself.
    #[error("computed property '{property}' depends on itself")]
    SelfDependency { property: String },

    /// Computed metadata registered for a property the object does not have.
    #[error("object {object} has no property '{property}'")]
    UnknownProperty { object: ObjectId, property: String },

    /// `update` called on a path node.
    #[error("reference {0} is not a root")]
    NotRoot(RefId),
}
