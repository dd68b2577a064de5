//! Compile-time and runtime programs, and the persisted program bundle.
//!
//! A [`WriteOnlyProgram`] pairs the heap and constant builder a compiler writes
//! into. Capturing it yields [`ProgramArtifacts`], which can be written to disk
//! as a bincode bundle and later hydrated into a [`RuntimeProgram`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HeapConfig;
use crate::constants::{
    ConstantPool, ConstantsBuilder, NoResolver, Resolver, RuntimeConstants,
};
use crate::error::{ProgramError, Result};
use crate::heap::{InstructionHeap, SerializedHeap};
use crate::opcode::OpcodeCursor;

/// Bundle format version (increment on breaking changes).
pub const ARTIFACTS_VERSION: u32 = 1;

/// Serialized output of a compilation: heap snapshot plus constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramArtifacts {
    pub version: u32,
    pub heap: SerializedHeap,
    pub constants: ConstantPool,
}

impl ProgramArtifacts {
    pub fn new(heap: SerializedHeap, constants: ConstantPool) -> Self {
        Self {
            version: ARTIFACTS_VERSION,
            heap,
            constants,
        }
    }

    /// Encode as a bincode bundle.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a bincode bundle, rejecting other format versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifacts: Self = bincode::deserialize(bytes)?;
        if artifacts.version != ARTIFACTS_VERSION {
            return Err(ProgramError::VersionMismatch {
                expected: ARTIFACTS_VERSION,
                found: artifacts.version,
            });
        }
        Ok(artifacts)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        fs::write(path, &bytes).map_err(|source| ProgramError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), bytes = bytes.len(), "program bundle written");
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|source| ProgramError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "program bundle read");
        Self::from_bytes(&bytes)
    }
}

/// Program under construction.
#[derive(Debug, Default)]
pub struct WriteOnlyProgram {
    pub heap: InstructionHeap,
    pub constants: ConstantsBuilder,
}

impl WriteOnlyProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HeapConfig) -> Result<Self> {
        Ok(Self {
            heap: InstructionHeap::with_config(config)?,
            constants: ConstantsBuilder::new(),
        })
    }

    /// Patch placeholders and snapshot heap and constants.
    pub fn capture(&mut self) -> ProgramArtifacts {
        ProgramArtifacts::new(self.heap.capture(), self.constants.to_pool())
    }
}

/// Hydrated program consumed by the interpreter loop.
#[derive(Debug)]
pub struct RuntimeProgram<R: Resolver = NoResolver> {
    heap: InstructionHeap,
    constants: RuntimeConstants<R>,
}

impl RuntimeProgram<NoResolver> {
    /// Hydrate a program whose handle constants are never resolved.
    pub fn hydrate(artifacts: ProgramArtifacts) -> Result<Self> {
        Ok(Self {
            heap: InstructionHeap::hydrate(&artifacts.heap)?,
            constants: RuntimeConstants::new(artifacts.constants),
        })
    }
}

impl<R: Resolver> RuntimeProgram<R> {
    /// Hydrate a program, resolving handle constants through `resolver`.
    pub fn hydrate_with_resolver(artifacts: ProgramArtifacts, resolver: R) -> Result<Self> {
        Ok(Self {
            heap: InstructionHeap::hydrate(&artifacts.heap)?,
            constants: RuntimeConstants::with_resolver(artifacts.constants, resolver),
        })
    }

    pub fn heap(&self) -> &InstructionHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut InstructionHeap {
        &mut self.heap
    }

    pub fn constants(&self) -> &RuntimeConstants<R> {
        &self.constants
    }

    /// A cursor over this program's heap, to be reused across dispatches.
    pub fn cursor(&self) -> OpcodeCursor<'_> {
        OpcodeCursor::new(&self.heap)
    }
}
