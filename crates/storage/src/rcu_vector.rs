//! Document handle table
//!
//! [`RefVector`] maps doc ids to [`EntryRef`]s. Readers index it without
//! locking while the single writer appends, updates and resizes it.
//!
//! # Publication
//!
//! Slots are `AtomicU32`. The writer stores a new handle with `Release`
//! after the entry it names is fully written; readers load with `Acquire`.
//! Resizing copies into a new array, publishes it through `ArcSwap`, and
//! parks the old array on the generation hold list, so a reader that loaded
//! the old array keeps a consistent (if stale) copy.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tensorcol_core::MemoryUsage;

use crate::entry_ref::EntryRef;
use crate::generation::Generation;
use crate::generation_holder::GenerationHolder;

/// How the handle table grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowStrategy {
    /// Capacity of a fresh table
    pub docs_initial_capacity: u32,
    /// Growth as a percentage of the current capacity
    pub docs_grow_percent: u32,
    /// Fixed growth added on top of the percentage
    pub docs_grow_delta: u32,
}

impl Default for GrowStrategy {
    fn default() -> Self {
        GrowStrategy {
            docs_initial_capacity: 1024,
            docs_grow_percent: 50,
            docs_grow_delta: 0,
        }
    }
}

impl GrowStrategy {
    /// Capacity after growing from `capacity`
    pub fn next_capacity(&self, capacity: usize) -> usize {
        let grown = capacity
            + capacity * self.docs_grow_percent as usize / 100
            + self.docs_grow_delta as usize;
        grown.max(capacity + 1)
    }
}

struct RefArray {
    slots: Box<[AtomicU32]>,
}

impl RefArray {
    fn with_capacity(capacity: usize) -> Self {
        RefArray {
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn byte_size(&self) -> usize {
        self.slots.len() * std::mem::size_of::<AtomicU32>()
    }
}

/// Writer side of the handle table
pub struct RefVector {
    array: Arc<ArcSwap<RefArray>>,
    size: usize,
    grow: GrowStrategy,
    holder: GenerationHolder<Arc<RefArray>>,
}

impl RefVector {
    /// Empty table with the strategy's initial capacity
    pub fn new(grow: GrowStrategy) -> Self {
        let capacity = (grow.docs_initial_capacity as usize).max(1);
        RefVector {
            array: Arc::new(ArcSwap::from_pointee(RefArray::with_capacity(capacity))),
            size: 0,
            grow,
            holder: GenerationHolder::new(),
        }
    }

    /// Reader handle sharing this table
    pub fn reader(&self) -> RefVectorReader {
        RefVectorReader {
            array: Arc::clone(&self.array),
        }
    }

    /// Number of slots in use
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of allocated slots
    pub fn capacity(&self) -> usize {
        self.array.load().slots.len()
    }

    /// Whether the next push must reallocate
    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Handle stored for `doc`
    pub fn get(&self, doc: usize) -> EntryRef {
        assert!(doc < self.size, "doc {} beyond table size {}", doc, self.size);
        EntryRef::from_u32(self.array.load().slots[doc].load(Ordering::Relaxed))
    }

    /// Publish `entry` for `doc`
    pub fn set(&mut self, doc: usize, entry: EntryRef) {
        assert!(doc < self.size, "doc {} beyond table size {}", doc, self.size);
        self.array.load().slots[doc].store(entry.as_u32(), Ordering::Release);
    }

    /// Append a slot holding `entry`
    pub fn push(&mut self, entry: EntryRef) {
        if self.is_full() {
            let capacity = self.grow.next_capacity(self.capacity());
            self.reallocate(capacity);
        }
        let doc = self.size;
        self.size += 1;
        self.set(doc, entry);
    }

    /// Grow to at least `size` slots, new slots invalid
    pub fn ensure_size(&mut self, size: usize) {
        if size > self.capacity() {
            let mut capacity = self.capacity();
            while capacity < size {
                capacity = self.grow.next_capacity(capacity);
            }
            self.reallocate(capacity);
        }
        self.size = self.size.max(size);
    }

    /// Cut the table to `size` slots and release the spare capacity
    pub fn shrink(&mut self, size: usize) {
        assert!(size <= self.size, "cannot shrink {} slots to {}", self.size, size);
        if size == self.size {
            return;
        }
        self.size = size;
        self.reallocate(size.max(1));
    }

    /// Forget every slot. The old array goes on hold.
    pub fn reset(&mut self) {
        self.size = 0;
        self.reallocate((self.grow.docs_initial_capacity as usize).max(1));
    }

    fn reallocate(&mut self, capacity: usize) {
        debug_assert!(capacity >= self.size);
        let fresh = RefArray::with_capacity(capacity);
        {
            let current = self.array.load();
            for (dst, src) in fresh.slots.iter().zip(current.slots.iter()).take(self.size) {
                dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
            }
        }
        let old = self.array.swap(Arc::new(fresh));
        let bytes = old.byte_size();
        self.holder.hold(old, bytes);
    }

    /// Copy of the first `limit` handles
    pub fn snapshot(&self, limit: usize) -> Vec<EntryRef> {
        let array = self.array.load();
        array.slots[..limit.min(self.size)]
            .iter()
            .map(|slot| EntryRef::from_u32(slot.load(Ordering::Relaxed)))
            .collect()
    }

    /// Stamp retired arrays with `generation`
    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.holder.transfer_hold_lists(generation);
    }

    /// Release retired arrays older than `first_used`
    pub fn trim_hold_lists(&mut self, first_used: Generation) {
        self.holder.trim_hold_lists(first_used, drop);
    }

    /// Memory held by the table, retired arrays included
    pub fn memory_usage(&self) -> MemoryUsage {
        let slot = std::mem::size_of::<AtomicU32>();
        let mut usage = MemoryUsage::new(self.capacity() * slot, self.size * slot, 0, 0);
        usage.merge_generation_held_bytes(self.holder.held_bytes());
        usage
    }
}

/// Read side of the handle table
#[derive(Clone)]
pub struct RefVectorReader {
    array: Arc<ArcSwap<RefArray>>,
}

impl RefVectorReader {
    /// Handle stored for `doc`, invalid if `doc` is beyond the current array
    pub fn acquire_entry_ref(&self, doc: usize) -> EntryRef {
        let array = self.array.load();
        match array.slots.get(doc) {
            Some(slot) => EntryRef::from_u32(slot.load(Ordering::Acquire)),
            None => EntryRef::invalid(),
        }
    }
}
