//! Disassembly of compiled blocks.

use std::fmt;

use crate::heap::{Handle, InstructionHeap};
use crate::opcode::{MachineOp, OpcodeCursor};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub offset: usize,
    pub op_type: u32,
    pub is_machine: bool,
    pub operands: Vec<u32>,
}

impl DecodedInstruction {
    /// Size in words, header included.
    pub fn size(&self) -> usize {
        self.operands.len() + 1
    }

    pub fn machine_op(&self) -> Option<MachineOp> {
        if self.is_machine {
            MachineOp::from_type(self.op_type)
        } else {
            None
        }
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}: ", self.offset)?;
        match self.machine_op() {
            Some(op) => write!(f, "{op}")?,
            None if self.is_machine => write!(f, "machine#{}", self.op_type)?,
            None => write!(f, "op#{}", self.op_type)?,
        }
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// Decode every instruction in `[start, end)`.
///
/// # Panics
///
/// Panics if an instruction runs past the live heap.
pub fn decode_range(heap: &InstructionHeap, start: usize, end: usize) -> Vec<DecodedInstruction> {
    let mut cursor = OpcodeCursor::new(heap);
    let mut offset = start;
    let mut decoded = Vec::new();
    while offset < end {
        let op = cursor.at(offset);
        let size = op.size();
        decoded.push(DecodedInstruction {
            offset,
            op_type: op.op_type(),
            is_machine: op.is_machine(),
            operands: (1..size).map(|i| heap.getbyaddr(offset + i)).collect(),
        });
        offset += size;
    }
    decoded
}

/// Decode the block allocated behind `handle`.
///
/// # Panics
///
/// Panics if the block runs past the live heap.
pub fn disassemble(heap: &InstructionHeap, handle: Handle) -> Vec<DecodedInstruction> {
    let start = heap.getaddr(handle);
    decode_range(heap, start, start + heap.sizeof(handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_block() {
        let mut heap = InstructionHeap::new();
        heap.push_instruction(9, &[]);
        let handle = heap.malloc();
        heap.push_machine_instruction(MachineOp::PushFrame.op_type(), &[]);
        heap.push_instruction(17, &[3, 4]);
        heap.push_machine_instruction(MachineOp::Jump.op_type(), &[12]);
        heap.finish_malloc(handle, 0);

        let decoded = disassemble(&heap, handle);
        let lines: Vec<String> = decoded.iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            vec!["0001: PushFrame", "0002: op#17 3 4", "0005: Jump 12"]
        );
        assert_eq!(decoded[1].size(), 3);
    }

    #[test]
    fn test_unknown_machine_op_display() {
        let decoded = DecodedInstruction {
            offset: 0,
            op_type: 99,
            is_machine: true,
            operands: vec![],
        };
        assert_eq!(decoded.to_string(), "0000: machine#99");
    }
}
