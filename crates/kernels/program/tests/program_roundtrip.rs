//! End-to-end tests: compile-side emission, bundle persistence, runtime decode.

use std::cell::Cell;
use std::rc::Rc;

use glimmer_program::heap::PLACEHOLDER;
use glimmer_program::{
    disassemble, HeapConfig, MachineOp, ProgramArtifacts, Resolver, RuntimeProgram,
    TableSlotState, WriteOnlyProgram,
};

const APPEND_TEXT: u32 = 20;
const HELPER_CALL: u32 = 21;

struct HelperNames;

impl Resolver for HelperNames {
    type Resolved = &'static str;

    fn resolve(&self, handle: u32) -> &'static str {
        match handle {
            1 => "concat",
            _ => "unknown",
        }
    }
}

/// Compile a tiny program: a `main` block that jumps over a text append into
/// a helper call, using a placeholder for the forward jump target.
fn compile() -> (ProgramArtifacts, glimmer_program::Handle) {
    let mut program = WriteOnlyProgram::with_config(HeapConfig { page_size: 16 }).unwrap();
    let greeting = program.constants.string("hello");
    let helper = program.constants.handle(1);
    let args = program.constants.string_array(&["a", "b"]);

    let main = program.heap.malloc();
    let label = Rc::new(Cell::new(0u32));
    let target = Rc::clone(&label);
    program
        .heap
        .push_machine(MachineOp::Jump.op_type() | (1 << glimmer_program::opcode::ARG_SHIFT));
    program.heap.push_placeholder(move || target.get());
    program.heap.push_instruction(APPEND_TEXT, &[greeting]);
    label.set(program.heap.size() as u32);
    program.heap.push_instruction(HELPER_CALL, &[helper, args]);
    program
        .heap
        .push_machine_instruction(MachineOp::Return.op_type(), &[]);
    program.heap.finish_malloc(main, 1);

    (program.capture(), main)
}

#[test]
fn test_bundle_file_round_trip() {
    let (artifacts, main) = compile();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.gbc");

    artifacts.write_to(&path).unwrap();
    let loaded = ProgramArtifacts::read_from(&path).unwrap();
    assert_eq!(loaded, artifacts);

    let program = RuntimeProgram::hydrate_with_resolver(loaded, HelperNames).unwrap();
    let heap = program.heap();
    assert_eq!(heap.sizeof(main), 8);
    assert_eq!(heap.scopesizeof(main), 1);
    assert_eq!(heap.state_of(main), TableSlotState::Allocated);
}

#[test]
fn test_interpreter_style_walk() {
    let (artifacts, main) = compile();
    let program = RuntimeProgram::hydrate_with_resolver(artifacts, HelperNames).unwrap();
    let constants = program.constants();
    let mut cursor = program.cursor();

    let start = program.heap().getaddr(main);
    let op = cursor.at(start);
    assert_eq!(op.machine_op(), Some(MachineOp::Jump));
    assert_ne!(op.op1(), PLACEHOLDER);
    let target = op.op1() as usize;

    let op = cursor.at(target);
    assert_eq!(op.op_type(), HELPER_CALL);
    assert!(!op.is_machine());
    assert_eq!(*constants.resolve_handle(op.op1()).unwrap(), "concat");
    assert_eq!(constants.get_string_array(op.op2()), vec!["a", "b"]);

    let next = cursor.next_offset();
    assert_eq!(cursor.at(next).machine_op(), Some(MachineOp::Return));
}

#[test]
fn test_disassemble_hydrated_program() {
    let (artifacts, main) = compile();
    let program = RuntimeProgram::hydrate(artifacts).unwrap();
    let lines: Vec<String> = disassemble(program.heap(), main)
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        lines,
        vec![
            "0000: Jump 4",
            "0002: op#20 0",
            "0004: op#21 0 1",
            "0007: Return",
        ]
    );
}

#[test]
fn test_compacted_program_survives_capture() {
    let mut program = WriteOnlyProgram::with_config(HeapConfig { page_size: 4 }).unwrap();
    let mut blocks = Vec::new();
    for i in 0..4u32 {
        let handle = program.heap.malloc();
        program.heap.push_instruction(APPEND_TEXT, &[i]);
        program.heap.push_instruction(APPEND_TEXT, &[i + 100]);
        program.heap.finish_malloc(handle, i);
        blocks.push(handle);
    }

    program.heap.free(blocks[0]);
    program.heap.free(blocks[2]);
    program.heap.compact();
    let artifacts = program.capture();

    let runtime = RuntimeProgram::hydrate(artifacts).unwrap();
    let heap = runtime.heap();
    assert_eq!(heap.size(), 8);
    for &i in &[1u32, 3] {
        let handle = blocks[i as usize];
        let decoded = disassemble(heap, handle);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].operands, vec![i]);
        assert_eq!(decoded[1].operands, vec![i + 100]);
        assert_eq!(heap.scopesizeof(handle), i);
    }
    assert_eq!(heap.state_of(blocks[0]), TableSlotState::Purged);
}
