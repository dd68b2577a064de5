//! Instruction word layout and the opcode cursor.
//!
//! Every instruction starts with a packed 32-bit header word followed by up to
//! three operand words:
//!
//! ```text
//!  31            11  10   9  8   7          0
//! +----------------+----+-----+-------------+
//! |     unused     | M  | LEN |    TYPE     |
//! +----------------+----+-----+-------------+
//! ```
//!
//! - `TYPE` is the 8-bit opcode type
//! - `LEN` is the operand count (0..=3)
//! - `M` marks machine instructions (frame and control-flow ops handled by the
//!   VM itself rather than the syntax layer)
//!
//! The instruction size in words is `LEN + 1`.

use std::fmt;

use crate::heap::InstructionHeap;

/// Bit offset of the operand count inside the header word.
pub const ARG_SHIFT: u32 = 8;
/// Largest opcode type that fits the header.
pub const TYPE_SIZE: u32 = 0b1111_1111;
/// Mask selecting the opcode type.
pub const TYPE_MASK: u32 = 0b0000_0000_1111_1111;
/// Mask selecting the operand count.
pub const OPERAND_LEN_MASK: u32 = 0b0000_0011_0000_0000;
/// Mask selecting the machine-instruction flag.
pub const MACHINE_MASK: u32 = 0b0000_0100_0000_0000;
/// Largest value an operand word may carry.
pub const MAX_OPERAND: u32 = 0b1111_1111_1111_1111;
/// Maximum number of operands per instruction.
pub const MAX_OPERANDS: usize = 3;

/// Encode an instruction header word.
///
/// # Panics
///
/// Panics if `op_type` does not fit in 8 bits or `operand_count` exceeds
/// [`MAX_OPERANDS`]. Both indicate a compiler bug.
pub fn encode_header(op_type: u32, operand_count: usize, machine: bool) -> u32 {
    assert!(
        op_type <= TYPE_SIZE,
        "opcode type over 8 bits: got {op_type}"
    );
    assert!(
        operand_count <= MAX_OPERANDS,
        "too many operands: got {operand_count}, max {MAX_OPERANDS}"
    );
    let machine_bit = if machine { MACHINE_MASK } else { 0 };
    op_type | machine_bit | ((operand_count as u32) << ARG_SHIFT)
}

/// Opcode type stored in a header word.
pub fn decode_type(word: u32) -> u32 {
    word & TYPE_MASK
}

/// Whether a header word carries the machine flag.
pub fn decode_is_machine(word: u32) -> bool {
    word & MACHINE_MASK != 0
}

/// Instruction size in words (header included) described by a header word.
pub fn decode_size(word: u32) -> usize {
    (((word & OPERAND_LEN_MASK) >> ARG_SHIFT) + 1) as usize
}

/// Instructions interpreted by the VM's own frame machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MachineOp {
    PushFrame = 0,
    PopFrame = 1,
    InvokeVirtual = 2,
    InvokeStatic = 3,
    Jump = 4,
    Return = 5,
    ReturnTo = 6,
}

impl MachineOp {
    /// All machine ops in type order.
    pub const ALL: [MachineOp; 7] = [
        MachineOp::PushFrame,
        MachineOp::PopFrame,
        MachineOp::InvokeVirtual,
        MachineOp::InvokeStatic,
        MachineOp::Jump,
        MachineOp::Return,
        MachineOp::ReturnTo,
    ];

    /// Look up a machine op by its opcode type.
    pub fn from_type(op_type: u32) -> Option<Self> {
        Self::ALL.get(op_type as usize).copied()
    }

    /// Opcode type of this machine op.
    pub fn op_type(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            MachineOp::PushFrame => "PushFrame",
            MachineOp::PopFrame => "PopFrame",
            MachineOp::InvokeVirtual => "InvokeVirtual",
            MachineOp::InvokeStatic => "InvokeStatic",
            MachineOp::Jump => "Jump",
            MachineOp::Return => "Return",
            MachineOp::ReturnTo => "ReturnTo",
        }
    }
}

impl fmt::Display for MachineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reusable decoder positioned over one instruction in a heap.
///
/// The interpreter loop keeps a single cursor and repositions it with
/// [`OpcodeCursor::at`] before each dispatch; nothing is allocated per
/// instruction. No bounds checking beyond the heap's own address assertion
/// is done here: stepping past the end of a block is the caller's bug.
#[derive(Clone, Copy)]
pub struct OpcodeCursor<'h> {
    heap: &'h InstructionHeap,
    offset: usize,
}

impl<'h> OpcodeCursor<'h> {
    /// Create a cursor over `heap` positioned at address 0.
    pub fn new(heap: &'h InstructionHeap) -> Self {
        Self { heap, offset: 0 }
    }

    /// Reposition the cursor and return it for chained field reads.
    pub fn at(&mut self, offset: usize) -> &mut Self {
        self.offset = offset;
        self
    }

    /// Address of the current header word.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Address of the instruction following this one.
    pub fn next_offset(&self) -> usize {
        self.offset + self.size()
    }

    fn header(&self) -> u32 {
        self.heap.getbyaddr(self.offset)
    }

    /// Instruction size in words, header included.
    pub fn size(&self) -> usize {
        decode_size(self.header())
    }

    pub fn is_machine(&self) -> bool {
        decode_is_machine(self.header())
    }

    /// Opcode type (8 bits).
    pub fn op_type(&self) -> u32 {
        decode_type(self.header())
    }

    pub fn op1(&self) -> u32 {
        self.heap.getbyaddr(self.offset + 1)
    }

    pub fn op2(&self) -> u32 {
        self.heap.getbyaddr(self.offset + 2)
    }

    pub fn op3(&self) -> u32 {
        self.heap.getbyaddr(self.offset + 3)
    }

    /// Machine op at the cursor, if this is a machine instruction of a known type.
    pub fn machine_op(&self) -> Option<MachineOp> {
        if self.is_machine() {
            MachineOp::from_type(self.op_type())
        } else {
            None
        }
    }
}

impl fmt::Debug for OpcodeCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcodeCursor")
            .field("offset", &self.offset)
            .finish()
    }
}
