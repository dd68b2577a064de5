//! Generational slot storage for graph nodes and inner references.
//!
//! Removed slots go on a free list and are handed out again with a bumped
//! generation, so a key kept past its removal never reaches the new value.

use std::marker::PhantomData;

/// Key into a [`Slots`] arena.
pub(crate) trait SlotKey: Copy {
    fn new(index: u32, generation: u32) -> Self;
    fn index(self) -> u32;
    fn generation(self) -> u32;
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Slots<K, T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    _key: PhantomData<K>,
}

impl<K, T> Default for Slots<K, T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            live: 0,
            _key: PhantomData,
        }
    }
}

impl<K: SlotKey, T> Slots<K, T> {
    pub(crate) fn insert(&mut self, value: T) -> K {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.entries[index as usize];
            slot.value = Some(value);
            return K::new(index, slot.generation);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Slot {
            generation: 0,
            value: Some(value),
        });
        K::new(index, 0)
    }

    fn slot(&self, key: K) -> Option<&Slot<T>> {
        self.entries
            .get(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
    }

    pub(crate) fn get(&self, key: K) -> Option<&T> {
        self.slot(key)?.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.entries
            .get_mut(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())?
            .value
            .as_mut()
    }

    pub(crate) fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Take the value out and free the slot. Stale keys yield `None`.
    pub(crate) fn remove(&mut self, key: K) -> Option<T> {
        let slot = self
            .entries
            .get_mut(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
        self.live -= 1;
        Some(value)
    }

    /// Live values.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Slots allocated so far, live or free.
    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }
}
