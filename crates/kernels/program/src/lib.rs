//! Glimmer Program
//!
//! The bytecode core of the Glimmer VM: a growable instruction heap with
//! handle-indexed allocations and compaction, a deduplicating constant pool,
//! and the opcode cursor the interpreter loop decodes instructions with.
//!
//! # Architecture
//!
//! - [`heap`] - Instruction buffer, allocation table, placeholders, compaction
//! - [`constants`] - Compile-time interning and runtime constant lookup
//! - [`opcode`] - Header word layout, encoder and [`OpcodeCursor`]
//! - [`program`] - Write-only and runtime programs, persisted bundles
//! - [`debug`] - Disassembler
//! - [`config`] - Heap configuration
//! - [`error`] - Error types for boundary failures
//!
//! # Example
//!
//! ```
//! use glimmer_program::{RuntimeProgram, WriteOnlyProgram};
//!
//! let mut program = WriteOnlyProgram::new();
//! let name = program.constants.string("title");
//! let block = program.heap.malloc();
//! program.heap.push_instruction(20, &[name]);
//! program.heap.finish_malloc(block, 0);
//!
//! let runtime = RuntimeProgram::hydrate(program.capture()).unwrap();
//! let mut cursor = runtime.cursor();
//! let op = cursor.at(runtime.heap().getaddr(block));
//! assert_eq!(op.op_type(), 20);
//! assert_eq!(runtime.constants().get_string(op.op1()), "title");
//! ```

pub mod config;
pub mod constants;
pub mod debug;
pub mod error;
pub mod heap;
pub mod opcode;
pub mod program;

pub use config::HeapConfig;
pub use constants::{
    ConstantPool, ConstantsBuilder, LazyConstants, NoResolver, Resolver, RuntimeConstants,
    EMPTY_ARRAY,
};
pub use debug::{disassemble, DecodedInstruction};
pub use error::{ProgramError, Result};
pub use heap::{
    Handle, InstructionHeap, SerializedHeap, Stdlib, StdlibOperand, TableEntry, TableSlotState,
};
pub use opcode::{MachineOp, OpcodeCursor};
pub use program::{ProgramArtifacts, RuntimeProgram, WriteOnlyProgram, ARTIFACTS_VERSION};
