//! Program errors.
//!
//! Only boundary failures are reported through [`ProgramError`]: loading a
//! serialized heap or bundle, decoding serializable constants, and resolving
//! handles without a resolver. Reading a compiled program that is internally
//! inconsistent (out-of-bounds addresses, out-of-range constant indices,
//! clobbered placeholders) is a corrupt-program condition and panics instead.

use std::path::PathBuf;

use thiserror::Error;

/// Program result type alias.
pub type Result<T> = std::result::Result<T, ProgramError>;

/// Errors produced while building, loading or persisting a program.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// Configuration validation failure.
    #[error("invalid heap config: {0}")]
    InvalidConfig(String),

    /// The serialized instruction buffer does not hold a whole number of words.
    #[error("serialized heap buffer is {len} bytes, not a multiple of 4")]
    MisalignedBuffer {
        /// Length of the offending buffer in bytes.
        len: usize,
    },

    /// The serialized allocation table is not a whole number of entries.
    #[error("serialized heap table has {len} slots, not a multiple of {entry_size}")]
    MalformedTable {
        /// Number of slots in the table.
        len: usize,
        /// Width of a single table entry.
        entry_size: u32,
    },

    /// The serialized handle counter disagrees with the table length.
    #[error("serialized heap handle {handle} does not match table length {table_len}")]
    HandleMismatch {
        /// Next handle recorded in the serialized heap.
        handle: u32,
        /// Number of slots in the table.
        table_len: usize,
    },

    /// A table entry points past the end of the serialized buffer.
    #[error("table entry {handle} points at {offset}, past the end of the {len}-word buffer")]
    EntryOutOfBounds {
        /// Handle of the entry.
        handle: u32,
        /// Recorded start offset.
        offset: u32,
        /// Number of words in the buffer.
        len: usize,
    },

    /// A handle constant was resolved on a pool that has no resolver.
    #[error("no resolver installed to resolve handle constant {index}")]
    MissingResolver {
        /// Index of the handle constant.
        index: u32,
    },

    /// A serializable constant could not be encoded or decoded.
    #[error("serializable constant {index:?}: {source}")]
    Serializable {
        /// Index of the constant when decoding.
        index: Option<u32>,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A program bundle could not be encoded or decoded.
    #[error("program bundle codec: {0}")]
    Bundle(#[from] bincode::Error),

    /// A program bundle was produced by an incompatible format version.
    #[error("program bundle version {found} is not supported (expected {expected})")]
    VersionMismatch {
        /// Version this build reads and writes.
        expected: u32,
        /// Version found in the bundle.
        found: u32,
    },

    /// Filesystem failure while reading or writing a bundle.
    #[error("{path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
