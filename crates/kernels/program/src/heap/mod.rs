//! Instruction heap.
//!
//! A flat, page-grown buffer of 32-bit instruction words plus an allocation
//! table addressed by [`Handle`]. Handles never move; the addresses they record
//! do, when [`InstructionHeap::compact`] squeezes freed blocks out of the
//! buffer. Consumers must re-read [`InstructionHeap::getaddr`] after a
//! compaction instead of holding on to raw addresses.
//!
//! # Table layout
//!
//! The table is a flat `Vec<u32>` of [`ENTRY_SIZE`]-slot entries:
//!
//! | slot | meaning |
//! |------|---------|
//! | 0 | start address of the block |
//! | 1 | info word: scope size in bits 2..32, [`TableSlotState`] in bits 0..2 |
//! | 2 | block size in words |
//!
//! A handle is the index of the entry's first slot, so handles step by
//! [`ENTRY_SIZE`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::config::HeapConfig;
use crate::error::{ProgramError, Result};
use crate::opcode::{encode_header, MACHINE_MASK, MAX_OPERAND};

#[cfg(test)]
mod tests;

/// Number of table slots per allocation entry.
pub const ENTRY_SIZE: u32 = 3;
const INFO_OFFSET: usize = 1;
const SIZE_OFFSET: usize = 2;

const STATE_MASK: u32 = 0b11;
const SCOPE_SHIFT: u32 = 2;

/// Largest scope size the info word can hold (30 bits).
pub const MAX_SCOPE_SIZE: u32 = u32::MAX >> SCOPE_SHIFT;

/// Sentinel written into a reserved word until it is patched.
pub const PLACEHOLDER: u32 = MAX_OPERAND;

/// Allocation state stored in the low bits of a table info word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TableSlotState {
    /// Live block produced by `malloc`/`finish_malloc`.
    Allocated = 0,
    /// Released; space is reclaimed by the next compaction.
    Freed = 1,
    /// Released and already reclaimed.
    Purged = 2,
    /// Handle for an address that owns no words of its own.
    Pointer = 3,
}

impl TableSlotState {
    fn from_info(info: u32) -> Self {
        match info & STATE_MASK {
            0 => TableSlotState::Allocated,
            1 => TableSlotState::Freed,
            2 => TableSlotState::Purged,
            _ => TableSlotState::Pointer,
        }
    }
}

fn encode_table_info(scope_size: u32, state: TableSlotState) -> u32 {
    (scope_size << SCOPE_SHIFT) | state as u32
}

fn change_state(info: u32, state: TableSlotState) -> u32 {
    (info & !STATE_MASK) | state as u32
}

/// Stable identifier of a heap allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(u32);

impl Handle {
    /// Wrap a raw handle value, as stored in operands or serialized tables.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    pub fn raw(self) -> u32 {
        self.0
    }

    fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Standard library blocks a compiled program may jump into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdlibOperand {
    Main,
    TrustingAppend,
    CautiousAppend,
}

/// Handles of the compiled standard library blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stdlib {
    pub main: Handle,
    pub trusting_append: Handle,
    pub cautious_append: Handle,
}

impl Stdlib {
    pub fn get(&self, operand: StdlibOperand) -> Handle {
        match operand {
            StdlibOperand::Main => self.main,
            StdlibOperand::TrustingAppend => self.trusting_append,
            StdlibOperand::CautiousAppend => self.cautious_append,
        }
    }
}

/// Decoded view of one allocation table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub handle: Handle,
    pub offset: usize,
    pub size: usize,
    pub scope_size: u32,
    pub state: TableSlotState,
}

/// Persisted form of a heap: the live instruction words (host byte order),
/// the allocation table and the next handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedHeap {
    pub handle: u32,
    pub table: Vec<u32>,
    pub buffer: Vec<u8>,
}

impl SerializedHeap {
    /// Decode the instruction buffer into words.
    pub fn words(&self) -> Result<Vec<u32>> {
        if self.buffer.len() % 4 != 0 {
            return Err(ProgramError::MisalignedBuffer {
                len: self.buffer.len(),
            });
        }
        Ok(self
            .buffer
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

type PlaceholderThunk = Box<dyn FnOnce() -> u32>;

/// Growable instruction buffer with handle-indexed allocations.
pub struct InstructionHeap {
    buffer: Vec<u32>,
    table: Vec<u32>,
    handle: u32,
    page_size: usize,
    placeholders: Vec<(usize, PlaceholderThunk)>,
    stdlibs: Vec<(usize, StdlibOperand)>,
}

impl InstructionHeap {
    /// Create an empty heap with the default page size.
    pub fn new() -> Self {
        Self::empty(HeapConfig::default())
    }

    /// Create an empty heap with a validated configuration.
    pub fn with_config(config: HeapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::empty(config))
    }

    fn empty(config: HeapConfig) -> Self {
        Self {
            buffer: Vec::with_capacity(config.page_size),
            table: Vec::new(),
            handle: 0,
            page_size: config.page_size,
            placeholders: Vec::new(),
            stdlibs: Vec::new(),
        }
    }

    /// Rebuild a heap from a captured snapshot using the default page size.
    pub fn hydrate(serialized: &SerializedHeap) -> Result<Self> {
        Self::hydrate_with_config(serialized, HeapConfig::default())
    }

    /// Rebuild a heap from a captured snapshot.
    ///
    /// The buffer is sized exactly to the snapshot, so the first push after
    /// hydration grows it by one page.
    pub fn hydrate_with_config(serialized: &SerializedHeap, config: HeapConfig) -> Result<Self> {
        config.validate()?;
        let words = serialized.words()?;

        if serialized.table.len() % ENTRY_SIZE as usize != 0 {
            return Err(ProgramError::MalformedTable {
                len: serialized.table.len(),
                entry_size: ENTRY_SIZE,
            });
        }
        if serialized.handle as usize != serialized.table.len() {
            return Err(ProgramError::HandleMismatch {
                handle: serialized.handle,
                table_len: serialized.table.len(),
            });
        }
        for (index, entry) in serialized
            .table
            .chunks_exact(ENTRY_SIZE as usize)
            .enumerate()
        {
            if TableSlotState::from_info(entry[INFO_OFFSET]) == TableSlotState::Purged {
                continue;
            }
            let end = entry[0] as usize + entry[SIZE_OFFSET] as usize;
            if end > words.len() {
                return Err(ProgramError::EntryOutOfBounds {
                    handle: index as u32 * ENTRY_SIZE,
                    offset: entry[0],
                    len: words.len(),
                });
            }
        }

        debug!(
            words = words.len(),
            entries = serialized.table.len() / ENTRY_SIZE as usize,
            "heap hydrated"
        );

        Ok(Self {
            buffer: words,
            table: serialized.table.clone(),
            handle: serialized.handle,
            page_size: config.page_size,
            placeholders: Vec::new(),
            stdlibs: Vec::new(),
        })
    }

    fn size_check(&mut self) {
        if self.buffer.len() == self.buffer.capacity() {
            self.buffer.reserve_exact(self.page_size);
            debug!(
                len = self.buffer.len(),
                capacity = self.buffer.capacity(),
                "heap grown by one page"
            );
        }
    }

    /// Append one word.
    pub fn push(&mut self, word: u32) {
        self.size_check();
        self.buffer.push(word);
    }

    /// Append one word with the machine-instruction bit set.
    pub fn push_machine(&mut self, word: u32) {
        self.push(word | MACHINE_MASK);
    }

    /// Encode and append a syntax instruction.
    ///
    /// # Panics
    ///
    /// Panics on an invalid header (see [`encode_header`]) or an operand
    /// wider than 16 bits.
    pub fn push_instruction(&mut self, op_type: u32, operands: &[u32]) {
        self.push_encoded(op_type, operands, false);
    }

    /// Encode and append a machine instruction.
    ///
    /// # Panics
    ///
    /// Same conditions as [`InstructionHeap::push_instruction`].
    pub fn push_machine_instruction(&mut self, op_type: u32, operands: &[u32]) {
        self.push_encoded(op_type, operands, true);
    }

    fn push_encoded(&mut self, op_type: u32, operands: &[u32], machine: bool) {
        self.push(encode_header(op_type, operands.len(), machine));
        for &operand in operands {
            assert!(
                operand <= MAX_OPERAND,
                "operand over 16 bits: got {operand}"
            );
            self.push(operand);
        }
    }

    /// Reserve a word to be filled by `thunk` when placeholders are patched.
    pub fn push_placeholder(&mut self, thunk: impl FnOnce() -> u32 + 'static) {
        self.size_check();
        let address = self.buffer.len();
        self.buffer.push(PLACEHOLDER);
        self.placeholders.push((address, Box::new(thunk)));
    }

    /// Reserve a word to be filled with a standard library handle.
    pub fn push_stdlib(&mut self, operand: StdlibOperand) {
        self.size_check();
        let address = self.buffer.len();
        self.buffer.push(PLACEHOLDER);
        self.stdlibs.push((address, operand));
    }

    /// Number of placeholders and stdlib slots not yet patched.
    pub fn pending_patches(&self) -> usize {
        self.placeholders.len() + self.stdlibs.len()
    }

    /// Read the word at `address`.
    ///
    /// # Panics
    ///
    /// Panics if `address` is past the live buffer. That only happens for a
    /// corrupt program or an interpreter bug.
    pub fn getbyaddr(&self, address: usize) -> u32 {
        match self.buffer.get(address) {
            Some(word) => *word,
            None => panic!(
                "heap read at {address} past live length {}",
                self.buffer.len()
            ),
        }
    }

    /// Overwrite the word at `address`.
    ///
    /// # Panics
    ///
    /// Panics if `address` is past the live buffer.
    pub fn setbyaddr(&mut self, address: usize, word: u32) {
        let len = self.buffer.len();
        match self.buffer.get_mut(address) {
            Some(slot) => *slot = word,
            None => panic!("heap write at {address} past live length {len}"),
        }
    }

    /// Reserve a table entry for a block starting at the current offset.
    ///
    /// Call [`InstructionHeap::finish_malloc`] once the block body is emitted.
    pub fn malloc(&mut self) -> Handle {
        let handle = self.next_handle(self.buffer.len() as u32, 0);
        trace!(%handle, offset = self.buffer.len(), "malloc");
        handle
    }

    /// Record the size and scope size of a block started by `malloc`.
    ///
    /// # Panics
    ///
    /// Panics if `scope_size` does not fit in 30 bits or `handle` is unknown.
    pub fn finish_malloc(&mut self, handle: Handle, scope_size: u32) {
        assert!(
            scope_size <= MAX_SCOPE_SIZE,
            "scope size {scope_size} does not fit the table info word"
        );
        let slot = self.entry_slot(handle);
        let start = self.table[slot] as usize;
        self.table[slot + SIZE_OFFSET] = (self.buffer.len() - start) as u32;
        self.table[slot + INFO_OFFSET] = encode_table_info(scope_size, TableSlotState::Allocated);
    }

    /// Create a pointer handle for an existing address.
    pub fn gethandle(&mut self, address: usize) -> Handle {
        self.next_handle(
            address as u32,
            encode_table_info(0, TableSlotState::Pointer),
        )
    }

    fn next_handle(&mut self, offset: u32, info: u32) -> Handle {
        self.table.extend_from_slice(&[offset, info, 0]);
        let handle = Handle(self.handle);
        self.handle += ENTRY_SIZE;
        handle
    }

    fn entry_slot(&self, handle: Handle) -> usize {
        let slot = handle.slot();
        assert!(
            slot % ENTRY_SIZE as usize == 0 && slot + SIZE_OFFSET < self.table.len(),
            "unknown heap handle {handle}"
        );
        slot
    }

    /// Number of live words (the next write address).
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Current start address of the block behind `handle`.
    pub fn getaddr(&self, handle: Handle) -> usize {
        self.table[self.entry_slot(handle)] as usize
    }

    /// Size in words of the block behind `handle`.
    pub fn sizeof(&self, handle: Handle) -> usize {
        self.table[self.entry_slot(handle) + SIZE_OFFSET] as usize
    }

    /// Scope size recorded by `finish_malloc`.
    pub fn scopesizeof(&self, handle: Handle) -> u32 {
        self.table[self.entry_slot(handle) + INFO_OFFSET] >> SCOPE_SHIFT
    }

    pub fn state_of(&self, handle: Handle) -> TableSlotState {
        TableSlotState::from_info(self.table[self.entry_slot(handle) + INFO_OFFSET])
    }

    /// Mark a block as freed. Space is reclaimed by the next [`compact`](Self::compact).
    ///
    /// Freeing an already purged block is a no-op.
    pub fn free(&mut self, handle: Handle) {
        let slot = self.entry_slot(handle) + INFO_OFFSET;
        let info = self.table[slot];
        if TableSlotState::from_info(info) == TableSlotState::Purged {
            trace!(%handle, "free of purged block ignored");
            return;
        }
        self.table[slot] = change_state(info, TableSlotState::Freed);
    }

    /// Iterate over decoded table entries in handle order.
    pub fn entries(&self) -> impl Iterator<Item = TableEntry> + '_ {
        self.table
            .chunks_exact(ENTRY_SIZE as usize)
            .enumerate()
            .map(|(index, entry)| TableEntry {
                handle: Handle(index as u32 * ENTRY_SIZE),
                offset: entry[0] as usize,
                size: entry[SIZE_OFFSET] as usize,
                scope_size: entry[INFO_OFFSET] >> SCOPE_SHIFT,
                state: TableSlotState::from_info(entry[INFO_OFFSET]),
            })
    }

    /// Reclaim the space of freed blocks.
    ///
    /// Freed entries become purged; every word outside a freed region is
    /// shifted down by the freed size below it, and allocated and pointer
    /// entries are relocated by the same amount. Pending placeholder
    /// addresses move with the words they belong to.
    #[instrument(skip_all)]
    pub fn compact(&mut self) {
        let mut freed: Vec<(usize, usize)> = Vec::new();
        for slot in (0..self.table.len()).step_by(ENTRY_SIZE as usize) {
            let info = self.table[slot + INFO_OFFSET];
            if TableSlotState::from_info(info) != TableSlotState::Freed {
                continue;
            }
            self.table[slot + INFO_OFFSET] = change_state(info, TableSlotState::Purged);
            let size = self.table[slot + SIZE_OFFSET] as usize;
            if size > 0 {
                freed.push((self.table[slot] as usize, size));
            }
        }

        if freed.is_empty() {
            debug!("compaction found no freed blocks");
            return;
        }
        let freed = merge_regions(freed);

        let mut compacted = Vec::with_capacity(self.buffer.capacity());
        let mut cursor = 0;
        for &(start, size) in &freed {
            if start > cursor {
                compacted.extend_from_slice(&self.buffer[cursor..start]);
            }
            cursor = cursor.max(start + size);
        }
        if cursor < self.buffer.len() {
            compacted.extend_from_slice(&self.buffer[cursor..]);
        }

        for slot in (0..self.table.len()).step_by(ENTRY_SIZE as usize) {
            match TableSlotState::from_info(self.table[slot + INFO_OFFSET]) {
                TableSlotState::Allocated | TableSlotState::Pointer => {
                    let offset = self.table[slot] as usize;
                    let shift = freed_below(&freed, offset);
                    if shift > 0 {
                        trace!(handle = slot, from = offset, to = offset - shift, "block moved");
                    }
                    self.table[slot] = (offset - shift) as u32;
                }
                TableSlotState::Freed | TableSlotState::Purged => {}
            }
        }

        self.placeholders
            .retain(|(address, _)| !inside_freed(&freed, *address));
        for (address, _) in &mut self.placeholders {
            *address -= freed_below(&freed, *address);
        }
        self.stdlibs
            .retain(|(address, _)| !inside_freed(&freed, *address));
        for (address, _) in &mut self.stdlibs {
            *address -= freed_below(&freed, *address);
        }

        let reclaimed = self.buffer.len() - compacted.len();
        debug!(
            blocks = freed.len(),
            reclaimed,
            size = compacted.len(),
            "heap compacted"
        );
        self.buffer = compacted;
    }

    /// Fill every pending placeholder with its thunk's value.
    ///
    /// # Panics
    ///
    /// Panics if a placeholder word no longer holds the [`PLACEHOLDER`]
    /// sentinel, which means something overwrote it before patching.
    pub fn patch_placeholders(&mut self) {
        let placeholders = std::mem::take(&mut self.placeholders);
        for (address, thunk) in placeholders {
            assert_eq!(
                self.getbyaddr(address),
                PLACEHOLDER,
                "expected to find a placeholder value at {address}"
            );
            self.setbyaddr(address, thunk());
        }
    }

    /// Fill every pending stdlib slot with the matching standard library handle.
    ///
    /// # Panics
    ///
    /// Panics if a stdlib slot no longer holds the [`PLACEHOLDER`] sentinel.
    pub fn patch_stdlibs(&mut self, stdlib: &Stdlib) {
        let stdlibs = std::mem::take(&mut self.stdlibs);
        for (address, operand) in stdlibs {
            assert_eq!(
                self.getbyaddr(address),
                PLACEHOLDER,
                "expected to find a stdlib placeholder value at {address}"
            );
            self.setbyaddr(address, stdlib.get(operand).raw());
        }
    }

    /// Patch placeholders and snapshot the whole live buffer.
    pub fn capture(&mut self) -> SerializedHeap {
        let offset = self.buffer.len();
        self.capture_until(offset)
    }

    /// Patch placeholders and snapshot the buffer up to `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is past the live buffer.
    #[instrument(skip(self))]
    pub fn capture_until(&mut self, offset: usize) -> SerializedHeap {
        self.patch_placeholders();
        assert!(
            offset <= self.buffer.len(),
            "capture offset {offset} past live length {}",
            self.buffer.len()
        );
        let buffer = self.buffer[..offset]
            .iter()
            .flat_map(|word| word.to_ne_bytes())
            .collect();
        debug!(words = offset, handle = self.handle, "heap captured");
        SerializedHeap {
            handle: self.handle,
            table: self.table.clone(),
            buffer,
        }
    }
}

impl Default for InstructionHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InstructionHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstructionHeap")
            .field("size", &self.buffer.len())
            .field("capacity", &self.buffer.capacity())
            .field("entries", &(self.table.len() / ENTRY_SIZE as usize))
            .field("handle", &self.handle)
            .field("pending_patches", &self.pending_patches())
            .finish()
    }
}

/// Sort `(start, size)` regions and merge overlapping ones. Blocks may nest
/// when a `malloc` happens before the enclosing `finish_malloc`.
fn merge_regions(mut regions: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    regions.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(regions.len());
    for (start, size) in regions {
        match merged.last_mut() {
            Some((last_start, last_size)) if start <= *last_start + *last_size => {
                *last_size = (*last_size).max(start + size - *last_start);
            }
            _ => merged.push((start, size)),
        }
    }
    merged
}

/// Words of disjoint, sorted freed regions lying below `address`.
fn freed_below(freed: &[(usize, usize)], address: usize) -> usize {
    freed
        .iter()
        .take_while(|(start, _)| *start < address)
        .map(|&(start, size)| size.min(address - start))
        .sum()
}

fn inside_freed(freed: &[(usize, usize)], address: usize) -> bool {
    freed
        .iter()
        .any(|&(start, size)| address >= start && address < start + size)
}
