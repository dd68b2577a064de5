//! Tests for heap allocation, placeholders, compaction and capture.

use std::cell::Cell;
use std::rc::Rc;

use super::*;
use crate::opcode::MACHINE_MASK;

fn small_heap() -> InstructionHeap {
    InstructionHeap::with_config(HeapConfig { page_size: 4 }).unwrap()
}

/// Emit a block of `words` and finish it with `scope_size`.
fn block(heap: &mut InstructionHeap, words: &[u32], scope_size: u32) -> Handle {
    let handle = heap.malloc();
    for &word in words {
        heap.push(word);
    }
    heap.finish_malloc(handle, scope_size);
    handle
}

fn block_words(heap: &InstructionHeap, handle: Handle) -> Vec<u32> {
    let start = heap.getaddr(handle);
    (start..start + heap.sizeof(handle))
        .map(|address| heap.getbyaddr(address))
        .collect()
}

#[test]
fn test_finish_malloc_records_size_and_scope() {
    let mut heap = small_heap();
    let h0 = heap.malloc();
    heap.push(0x1234);
    heap.push(0x1234);
    heap.push(0x1234);
    heap.finish_malloc(h0, 2);

    assert_eq!(heap.sizeof(h0), 3);
    assert_eq!(heap.scopesizeof(h0), 2);
    assert_eq!(heap.getaddr(h0), 0);
    assert_eq!(heap.state_of(h0), TableSlotState::Allocated);
}

#[test]
fn test_handles_step_by_entry_size() {
    let mut heap = small_heap();
    let a = heap.malloc();
    let b = heap.malloc();
    let c = heap.gethandle(0);
    assert_eq!(a.raw(), 0);
    assert_eq!(b.raw(), ENTRY_SIZE);
    assert_eq!(c.raw(), 2 * ENTRY_SIZE);
    assert_eq!(heap.state_of(c), TableSlotState::Pointer);
}

#[test]
fn test_push_grows_past_page_boundary() {
    let mut heap = small_heap();
    for word in 0..10 {
        heap.push(word);
    }
    assert_eq!(heap.size(), 10);
    assert_eq!(heap.getbyaddr(9), 9);
}

#[test]
fn test_push_machine_sets_flag() {
    let mut heap = small_heap();
    heap.push_machine(4);
    assert_eq!(heap.getbyaddr(0), 4 | MACHINE_MASK);
}

#[test]
#[should_panic(expected = "past live length")]
fn test_read_past_end_panics() {
    let mut heap = small_heap();
    heap.push(1);
    heap.getbyaddr(1);
}

#[test]
#[should_panic(expected = "operand over 16 bits")]
fn test_wide_operand_panics() {
    let mut heap = small_heap();
    heap.push_instruction(1, &[0x1_0000]);
}

#[test]
fn test_large_scope_size_round_trips() {
    let mut heap = small_heap();
    let handle = block(&mut heap, &[1], MAX_SCOPE_SIZE);
    assert_eq!(heap.scopesizeof(handle), MAX_SCOPE_SIZE);
    assert_eq!(heap.state_of(handle), TableSlotState::Allocated);
}

#[test]
fn test_placeholder_patched_on_capture() {
    let mut heap = small_heap();
    let target = Rc::new(Cell::new(0u32));
    let label = Rc::clone(&target);

    heap.push_instruction(4, &[]);
    heap.push_placeholder(move || label.get());
    heap.push(7);
    target.set(42);

    assert_eq!(heap.getbyaddr(1), PLACEHOLDER);
    assert_eq!(heap.pending_patches(), 1);
    let captured = heap.capture();
    assert_eq!(heap.getbyaddr(1), 42);
    assert_eq!(heap.pending_patches(), 0);
    assert_eq!(captured.words().unwrap(), vec![4, 42, 7]);
}

#[test]
#[should_panic(expected = "expected to find a placeholder value at 0")]
fn test_clobbered_placeholder_panics() {
    let mut heap = small_heap();
    heap.push_placeholder(|| 1);
    heap.setbyaddr(0, 99);
    heap.patch_placeholders();
}

#[test]
fn test_stdlib_slots_patched_with_handles() {
    let mut heap = small_heap();
    heap.push_stdlib(StdlibOperand::Main);
    heap.push_stdlib(StdlibOperand::CautiousAppend);
    let main = block(&mut heap, &[1], 0);
    let trusting = block(&mut heap, &[2], 0);
    let cautious = block(&mut heap, &[3], 0);

    heap.patch_stdlibs(&Stdlib {
        main,
        trusting_append: trusting,
        cautious_append: cautious,
    });
    assert_eq!(heap.getbyaddr(0), main.raw());
    assert_eq!(heap.getbyaddr(1), cautious.raw());
}

#[test]
fn test_free_only_marks_state() {
    let mut heap = small_heap();
    let handle = block(&mut heap, &[1, 2], 0);
    heap.free(handle);
    assert_eq!(heap.state_of(handle), TableSlotState::Freed);
    assert_eq!(heap.size(), 2);
    assert_eq!(heap.getbyaddr(1), 2);
}

#[test]
fn test_compaction_preserves_live_blocks() {
    let mut heap = small_heap();
    let a = block(&mut heap, &[10, 11, 12], 1);
    let b = block(&mut heap, &[20, 21], 2);
    let c = block(&mut heap, &[30, 31, 32, 33], 3);
    let d = block(&mut heap, &[40], 4);

    let before_c = block_words(&heap, c);
    let before_d = block_words(&heap, d);
    let size_before = heap.size();

    heap.free(a);
    heap.free(b);
    heap.compact();

    assert_eq!(heap.state_of(a), TableSlotState::Purged);
    assert_eq!(heap.state_of(b), TableSlotState::Purged);
    assert_eq!(block_words(&heap, c), before_c);
    assert_eq!(block_words(&heap, d), before_d);
    assert_eq!(heap.getaddr(c), 0);
    assert_eq!(heap.getaddr(d), 4);
    assert_eq!(heap.scopesizeof(d), 4);
    assert!(heap.size() <= size_before - 5);
}

#[test]
fn test_compaction_with_interleaved_frees() {
    let mut heap = small_heap();
    let handles: Vec<Handle> = (0..6)
        .map(|i| block(&mut heap, &[i * 100, i * 100 + 1], 0))
        .collect();

    for handle in handles.iter().step_by(2) {
        heap.free(*handle);
    }
    heap.compact();

    for (i, handle) in handles.iter().enumerate().skip(1).step_by(2) {
        let i = i as u32;
        assert_eq!(block_words(&heap, *handle), vec![i * 100, i * 100 + 1]);
    }
    assert_eq!(heap.size(), 6);
}

#[test]
fn test_compaction_with_nested_freed_blocks() {
    let mut heap = small_heap();
    let outer = heap.malloc();
    heap.push(1);
    let inner = block(&mut heap, &[2, 3], 0);
    heap.push(4);
    heap.finish_malloc(outer, 0);
    let tail = block(&mut heap, &[9], 0);

    heap.free(outer);
    heap.free(inner);
    heap.compact();

    assert_eq!(heap.size(), 1);
    assert_eq!(heap.getaddr(tail), 0);
    assert_eq!(block_words(&heap, tail), vec![9]);
    assert_eq!(heap.state_of(inner), TableSlotState::Purged);
}

#[test]
fn test_merge_regions_joins_overlaps() {
    assert_eq!(
        merge_regions(vec![(5, 2), (0, 4), (1, 2), (4, 1)]),
        vec![(0, 7)]
    );
    assert_eq!(merge_regions(vec![(6, 1), (0, 2)]), vec![(0, 2), (6, 1)]);
}

#[test]
fn test_purged_entries_skipped_by_later_compaction() {
    let mut heap = small_heap();
    let a = block(&mut heap, &[1, 1], 0);
    let b = block(&mut heap, &[2, 2], 0);
    let c = block(&mut heap, &[3, 3], 0);

    heap.free(a);
    heap.compact();
    assert_eq!(heap.size(), 4);

    heap.free(a);
    heap.compact();
    assert_eq!(heap.size(), 4);
    assert_eq!(heap.state_of(a), TableSlotState::Purged);

    heap.free(b);
    heap.compact();
    assert_eq!(heap.size(), 2);
    assert_eq!(block_words(&heap, c), vec![3, 3]);
}

#[test]
fn test_compaction_relocates_pointer_entries() {
    let mut heap = small_heap();
    let a = block(&mut heap, &[1, 1, 1], 0);
    let b = block(&mut heap, &[2, 2], 0);
    let pointer = heap.gethandle(heap.getaddr(b) + 1);

    heap.free(a);
    heap.compact();

    assert_eq!(heap.getaddr(pointer), 1);
    assert_eq!(heap.getbyaddr(heap.getaddr(pointer)), 2);
}

#[test]
fn test_compaction_keeps_unowned_words() {
    let mut heap = small_heap();
    heap.push(0xAA);
    let a = block(&mut heap, &[1, 1], 0);
    heap.push(0xBB);
    let b = block(&mut heap, &[2], 0);

    heap.free(a);
    heap.compact();

    assert_eq!(heap.getbyaddr(0), 0xAA);
    assert_eq!(heap.getbyaddr(1), 0xBB);
    assert_eq!(heap.getaddr(b), 2);
}

#[test]
fn test_compaction_moves_pending_placeholders() {
    let mut heap = small_heap();
    let a = block(&mut heap, &[1, 1], 0);
    heap.push_placeholder(|| 5);
    heap.free(a);
    heap.compact();

    assert_eq!(heap.getbyaddr(0), PLACEHOLDER);
    heap.patch_placeholders();
    assert_eq!(heap.getbyaddr(0), 5);
}

#[test]
fn test_compaction_without_frees_is_noop() {
    let mut heap = small_heap();
    let a = block(&mut heap, &[1, 2, 3], 0);
    heap.compact();
    assert_eq!(heap.size(), 3);
    assert_eq!(block_words(&heap, a), vec![1, 2, 3]);
}

#[test]
fn test_capture_and_hydrate_round_trip() {
    let mut heap = small_heap();
    let a = block(&mut heap, &[5, 6, 7], 3);
    heap.push(0xFEED);

    let captured = heap.capture();
    let hydrated = InstructionHeap::hydrate(&captured).unwrap();

    for address in 0..heap.size() {
        assert_eq!(hydrated.getbyaddr(address), heap.getbyaddr(address));
    }
    assert_eq!(hydrated.size(), heap.size());
    assert_eq!(hydrated.getaddr(a), 0);
    assert_eq!(hydrated.sizeof(a), 3);
    assert_eq!(hydrated.scopesizeof(a), 3);
}

#[test]
fn test_hydrated_heap_keeps_allocating_handles() {
    let mut heap = small_heap();
    let a = block(&mut heap, &[1], 0);
    let mut hydrated = InstructionHeap::hydrate(&heap.capture()).unwrap();

    let b = block(&mut hydrated, &[2, 3], 0);
    assert_eq!(b.raw(), a.raw() + ENTRY_SIZE);
    assert_eq!(hydrated.getaddr(b), 1);
    assert_eq!(hydrated.getbyaddr(2), 3);
}

#[test]
fn test_capture_until_prefix() {
    let mut heap = small_heap();
    for word in [1, 2, 3, 4] {
        heap.push(word);
    }
    let captured = heap.capture_until(2);
    assert_eq!(captured.words().unwrap(), vec![1, 2]);
}

#[test]
fn test_hydrate_rejects_misaligned_buffer() {
    let serialized = SerializedHeap {
        handle: 0,
        table: vec![],
        buffer: vec![0; 6],
    };
    assert!(matches!(
        InstructionHeap::hydrate(&serialized),
        Err(ProgramError::MisalignedBuffer { len: 6 })
    ));
}

#[test]
fn test_hydrate_rejects_partial_table() {
    let serialized = SerializedHeap {
        handle: 2,
        table: vec![0, 0],
        buffer: vec![],
    };
    assert!(matches!(
        InstructionHeap::hydrate(&serialized),
        Err(ProgramError::MalformedTable { len: 2, .. })
    ));
}

#[test]
fn test_hydrate_rejects_handle_mismatch() {
    let serialized = SerializedHeap {
        handle: 6,
        table: vec![0, 0, 0],
        buffer: vec![],
    };
    assert!(matches!(
        InstructionHeap::hydrate(&serialized),
        Err(ProgramError::HandleMismatch { handle: 6, .. })
    ));
}

#[test]
fn test_hydrate_rejects_entry_past_buffer() {
    let serialized = SerializedHeap {
        handle: 3,
        table: vec![0, 0, 2],
        buffer: 1u32.to_ne_bytes().to_vec(),
    };
    assert!(matches!(
        InstructionHeap::hydrate(&serialized),
        Err(ProgramError::EntryOutOfBounds { handle: 0, .. })
    ));
}

#[test]
fn test_entries_report_table_state() {
    let mut heap = small_heap();
    let a = block(&mut heap, &[1, 2], 5);
    let b = block(&mut heap, &[3], 0);
    heap.free(b);

    let entries: Vec<TableEntry> = heap.entries().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries[0],
        TableEntry {
            handle: a,
            offset: 0,
            size: 2,
            scope_size: 5,
            state: TableSlotState::Allocated,
        }
    );
    assert_eq!(entries[1].state, TableSlotState::Freed);
}
