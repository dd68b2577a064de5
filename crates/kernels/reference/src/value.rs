//! Dynamic values flowing through references.
//!
//! Objects are shared, interior-mutable property maps with a process-unique
//! [`ObjectId`]. Two object values are the same only if they are the same
//! object; primitives compare by value.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an [`Object`], used to key side tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

struct ObjectData {
    id: ObjectId,
    props: RefCell<IndexMap<String, Value>>,
}

/// Shared handle to a property map. Cloning shares the same object.
#[derive(Clone)]
pub struct Object(Rc<ObjectData>);

impl Object {
    pub fn new() -> Self {
        Self(Rc::new(ObjectData {
            id: ObjectId::next(),
            props: RefCell::new(IndexMap::new()),
        }))
    }

    /// Build an object from key/value pairs, keeping their order.
    pub fn from_props<K, V>(props: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let object = Self::new();
        for (key, value) in props {
            object.set(key, value);
        }
        object
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    /// Read a property; missing properties are `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        self.0
            .props
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.props.borrow_mut().insert(key.into(), value.into());
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.props.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.props.borrow().keys().cloned().collect()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

// Keys only: objects may contain themselves.
impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id())
            .field("keys", &self.keys())
            .finish()
    }
}

/// A value a reference can produce.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(Object),
}

impl Value {
    /// `Undefined` or `Null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Property lookup with template semantics: objects yield their property
    /// or `Undefined`, strings expose `length`, everything else is `Undefined`.
    pub fn get_property(&self, key: &str) -> Value {
        match self {
            Value::Object(object) => object.get(key),
            Value::String(s) if key == "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Undefined,
        }
    }

    /// Identity comparison: objects by identity, primitives by value.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}
