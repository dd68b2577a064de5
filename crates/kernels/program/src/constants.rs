//! Constant pool.
//!
//! The compiler interns literals through [`ConstantsBuilder`] and freezes them
//! into a [`ConstantPool`]. At runtime the pool is wrapped in
//! [`RuntimeConstants`], which answers index lookups and lazily resolves
//! handle constants through an injected [`Resolver`].
//!
//! Indices are stable for the lifetime of a pool. Heap compaction never
//! renumbers constants.

use std::cell::OnceCell;
use std::convert::Infallible;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ProgramError, Result};

/// Index of the canonical empty array.
pub const EMPTY_ARRAY: u32 = 0;

/// Frozen constant tables, as persisted next to the heap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantPool {
    pub strings: Vec<String>,
    pub arrays: Vec<Vec<u32>>,
    pub handles: Vec<u32>,
    pub numbers: Vec<f64>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self {
            strings: Vec::new(),
            arrays: vec![Vec::new()],
            handles: Vec::new(),
            numbers: Vec::new(),
        }
    }
}

/// Write-side constant interning used during compilation.
#[derive(Debug, Clone, Default)]
pub struct ConstantsBuilder {
    pool: ConstantPool,
}

impl ConstantsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string.
    pub fn string(&mut self, value: &str) -> u32 {
        if let Some(index) = self.pool.strings.iter().position(|s| s == value) {
            return index as u32;
        }
        self.pool.strings.push(value.to_string());
        (self.pool.strings.len() - 1) as u32
    }

    /// Intern a numeric literal.
    pub fn number(&mut self, value: f64) -> u32 {
        if let Some(index) = self.pool.numbers.iter().position(|n| *n == value) {
            return index as u32;
        }
        self.pool.numbers.push(value);
        (self.pool.numbers.len() - 1) as u32
    }

    /// Store an array of constant indices.
    ///
    /// Empty arrays map to [`EMPTY_ARRAY`]. Non-empty arrays are always
    /// appended, even when an equal array is already present.
    pub fn array(&mut self, values: Vec<u32>) -> u32 {
        if values.is_empty() {
            return EMPTY_ARRAY;
        }
        self.pool.arrays.push(values);
        (self.pool.arrays.len() - 1) as u32
    }

    /// Intern every string and store the resulting index array.
    pub fn string_array(&mut self, strings: &[&str]) -> u32 {
        let indices: Vec<u32> = strings.iter().map(|s| self.string(s)).collect();
        self.array(indices)
    }

    /// Record a raw runtime handle for deferred resolution.
    pub fn handle(&mut self, handle: u32) -> u32 {
        if let Some(index) = self.pool.handles.iter().position(|h| *h == handle) {
            return index as u32;
        }
        self.pool.handles.push(handle);
        (self.pool.handles.len() - 1) as u32
    }

    /// Store a value as JSON text in the string table.
    pub fn serializable<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<u32> {
        let json = serde_json::to_string(value)
            .map_err(|source| ProgramError::Serializable {
                index: None,
                source,
            })?;
        Ok(self.string(&json))
    }

    /// Snapshot of the tables built so far.
    pub fn to_pool(&self) -> ConstantPool {
        self.pool.clone()
    }

    /// Consume the builder, yielding its tables.
    pub fn into_pool(self) -> ConstantPool {
        self.pool
    }
}

/// Turns raw handle constants into runtime values.
pub trait Resolver {
    type Resolved;

    fn resolve(&self, handle: u32) -> Self::Resolved;
}

/// Resolver type of pools that never resolve handles.
#[derive(Debug, Clone, Copy)]
pub enum NoResolver {}

impl Resolver for NoResolver {
    type Resolved = Infallible;

    fn resolve(&self, _handle: u32) -> Infallible {
        match *self {}
    }
}

/// Read-only runtime view of a [`ConstantPool`].
///
/// Index lookups panic when out of range: a compiled program only references
/// constants it emitted, so a bad index means the program is corrupt.
pub struct RuntimeConstants<R: Resolver = NoResolver> {
    pool: ConstantPool,
    resolver: Option<R>,
    resolved: Vec<OnceCell<R::Resolved>>,
}

impl RuntimeConstants<NoResolver> {
    /// Wrap a pool without handle resolution.
    pub fn new(pool: ConstantPool) -> Self {
        Self::build(pool, None)
    }
}

impl<R: Resolver> RuntimeConstants<R> {
    /// Wrap a pool, resolving handle constants through `resolver`.
    pub fn with_resolver(pool: ConstantPool, resolver: R) -> Self {
        Self::build(pool, Some(resolver))
    }

    fn build(pool: ConstantPool, resolver: Option<R>) -> Self {
        let resolved = pool.handles.iter().map(|_| OnceCell::new()).collect();
        Self {
            pool,
            resolver,
            resolved,
        }
    }

    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    /// # Panics
    ///
    /// Panics if `index` is not a string constant.
    pub fn get_string(&self, index: u32) -> &str {
        lookup(&self.pool.strings, index, "string").as_str()
    }

    /// # Panics
    ///
    /// Panics if `index` is not a number constant.
    pub fn get_number(&self, index: u32) -> f64 {
        *lookup(&self.pool.numbers, index, "number")
    }

    /// # Panics
    ///
    /// Panics if `index` is not an array constant.
    pub fn get_array(&self, index: u32) -> &[u32] {
        lookup(&self.pool.arrays, index, "array").as_slice()
    }

    /// Map an array constant through [`get_string`](Self::get_string).
    ///
    /// # Panics
    ///
    /// Panics if the array or any of its elements is out of range.
    pub fn get_string_array(&self, index: u32) -> Vec<&str> {
        self.get_array(index)
            .iter()
            .map(|&element| self.get_string(element))
            .collect()
    }

    /// Decode a constant stored by [`ConstantsBuilder::serializable`].
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a string constant.
    pub fn get_serializable<T: DeserializeOwned>(&self, index: u32) -> Result<T> {
        serde_json::from_str(self.get_string(index)).map_err(|source| {
            ProgramError::Serializable {
                index: Some(index),
                source,
            }
        })
    }

    /// Resolve a handle constant, caching the result for later calls.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::MissingResolver`] if the pool was built
    /// without a resolver. A pool carrying handle constants is always built
    /// with one, so callers must treat this error as a corrupt program and
    /// abort execution rather than recover.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a handle constant.
    pub fn resolve_handle(&self, index: u32) -> Result<&R::Resolved> {
        let cell = lookup(&self.resolved, index, "handle");
        if let Some(resolved) = cell.get() {
            return Ok(resolved);
        }
        let resolver = self
            .resolver
            .as_ref()
            .ok_or(ProgramError::MissingResolver { index })?;
        let handle = self.pool.handles[index as usize];
        trace!(index, handle, "resolving handle constant");
        Ok(cell.get_or_init(|| resolver.resolve(handle)))
    }
}

impl<R: Resolver> std::fmt::Debug for RuntimeConstants<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConstants")
            .field("strings", &self.pool.strings.len())
            .field("arrays", &self.pool.arrays.len())
            .field("handles", &self.pool.handles.len())
            .field("numbers", &self.pool.numbers.len())
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

fn lookup<'a, T>(table: &'a [T], index: u32, kind: &str) -> &'a T {
    match table.get(index as usize) {
        Some(value) => value,
        None => panic!(
            "{kind} constant {index} out of range ({} entries)",
            table.len()
        ),
    }
}

/// Constant store that keeps serializable values in memory.
///
/// Used when producer and consumer share a process and nothing crosses a
/// serialization boundary; values are handed back as-is.
#[derive(Debug, Clone)]
pub struct LazyConstants<T> {
    builder: ConstantsBuilder,
    others: Vec<T>,
}

impl<T> Default for LazyConstants<T> {
    fn default() -> Self {
        Self {
            builder: ConstantsBuilder::new(),
            others: Vec::new(),
        }
    }
}

impl<T: PartialEq> LazyConstants<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Literal tables shared with the regular builder.
    pub fn builder(&mut self) -> &mut ConstantsBuilder {
        &mut self.builder
    }

    /// Store a value, returning the index of an equal stored value if any.
    pub fn serializable(&mut self, value: T) -> u32 {
        if let Some(index) = self.others.iter().position(|other| *other == value) {
            return index as u32;
        }
        self.other(value)
    }

    /// Store a value without deduplication.
    pub fn other(&mut self, value: T) -> u32 {
        self.others.push(value);
        (self.others.len() - 1) as u32
    }

    /// # Panics
    ///
    /// Panics if `index` is not a stored value.
    pub fn get_serializable(&self, index: u32) -> &T {
        lookup(&self.others, index, "serializable")
    }

    /// # Panics
    ///
    /// Panics if `index` is not a stored value.
    pub fn get_other(&self, index: u32) -> &T {
        lookup(&self.others, index, "other")
    }

    pub fn to_pool(&self) -> ConstantPool {
        self.builder.to_pool()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde::Deserialize;

    use super::*;

    #[test]
    fn test_string_dedup() {
        let mut builder = ConstantsBuilder::new();
        let indices = [
            builder.string("x"),
            builder.string("y"),
            builder.string("x"),
        ];
        assert_eq!(indices, [0, 1, 0]);
        assert_eq!(builder.to_pool().strings, vec!["x", "y"]);
    }

    #[test]
    fn test_number_dedup() {
        let mut builder = ConstantsBuilder::new();
        assert_eq!(builder.number(1.5), 0);
        assert_eq!(builder.number(2.0), 1);
        assert_eq!(builder.number(1.5), 0);
        assert_eq!(builder.to_pool().numbers, vec![1.5, 2.0]);
    }

    #[test]
    fn test_empty_array_is_canonical() {
        let mut builder = ConstantsBuilder::new();
        assert_eq!(builder.array(vec![]), EMPTY_ARRAY);
        assert_eq!(builder.array(vec![]), EMPTY_ARRAY);

        let constants = RuntimeConstants::new(builder.into_pool());
        assert!(constants.get_array(EMPTY_ARRAY).is_empty());
    }

    #[test]
    fn test_equal_arrays_are_not_merged() {
        let mut builder = ConstantsBuilder::new();
        let first = builder.array(vec![1, 2]);
        let second = builder.array(vec![1, 2]);
        assert_ne!(first, second);
        assert_eq!(builder.to_pool().arrays.len(), 3);
    }

    #[test]
    fn test_string_array_lookup() {
        let mut builder = ConstantsBuilder::new();
        builder.string("b");
        let index = builder.string_array(&["a", "b", "c"]);

        let constants = RuntimeConstants::new(builder.into_pool());
        assert_eq!(constants.get_array(index), &[1, 0, 2]);
        assert_eq!(constants.get_string_array(index), vec!["a", "b", "c"]);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Symbols {
        locals: Vec<String>,
        has_eval: bool,
    }

    #[test]
    fn test_serializable_round_trip() {
        let mut builder = ConstantsBuilder::new();
        let table = Symbols {
            locals: vec!["item".to_string()],
            has_eval: false,
        };
        let index = builder.serializable(&table).unwrap();
        assert_eq!(builder.serializable(&table).unwrap(), index);

        let constants = RuntimeConstants::new(builder.into_pool());
        let decoded: Symbols = constants.get_serializable(index).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_serializable_decode_error() {
        let mut builder = ConstantsBuilder::new();
        let index = builder.string("not json");
        let constants = RuntimeConstants::new(builder.into_pool());
        let result: Result<Symbols> = constants.get_serializable(index);
        assert!(matches!(
            result,
            Err(ProgramError::Serializable { index: Some(0), .. })
        ));
    }

    struct CountingResolver {
        calls: Cell<usize>,
    }

    impl Resolver for CountingResolver {
        type Resolved = String;

        fn resolve(&self, handle: u32) -> String {
            self.calls.set(self.calls.get() + 1);
            format!("helper-{handle}")
        }
    }

    #[test]
    fn test_resolve_handle_is_cached() {
        let mut builder = ConstantsBuilder::new();
        let index = builder.handle(77);
        assert_eq!(builder.handle(77), index);

        let constants = RuntimeConstants::with_resolver(
            builder.into_pool(),
            CountingResolver {
                calls: Cell::new(0),
            },
        );
        assert_eq!(constants.resolve_handle(index).unwrap(), "helper-77");
        assert_eq!(constants.resolve_handle(index).unwrap(), "helper-77");
        assert_eq!(constants.resolver.as_ref().unwrap().calls.get(), 1);
    }

    #[test]
    fn test_resolve_handle_without_resolver() {
        let mut builder = ConstantsBuilder::new();
        let index = builder.handle(3);
        let constants = RuntimeConstants::new(builder.into_pool());
        assert!(matches!(
            constants.resolve_handle(index),
            Err(ProgramError::MissingResolver { index: 0 })
        ));
    }

    #[test]
    #[should_panic(expected = "string constant 4 out of range")]
    fn test_out_of_range_string_panics() {
        let constants = RuntimeConstants::new(ConstantPool::default());
        constants.get_string(4);
    }

    #[test]
    fn test_lazy_constants_keep_values_in_memory() {
        let mut lazy: LazyConstants<Vec<&str>> = LazyConstants::new();
        let a = lazy.serializable(vec!["a"]);
        let b = lazy.serializable(vec!["a"]);
        let c = lazy.other(vec!["a"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(lazy.get_serializable(a), &vec!["a"]);

        lazy.builder().string("name");
        assert_eq!(lazy.to_pool().strings, vec!["name"]);
    }
}
