//! Hold lists for retired data
//!
//! Retiring something is a two step process. The writer first puts it on the
//! pending list with [`GenerationHolder::hold`]. When the writer advances the
//! generation, [`transfer_hold_lists`](GenerationHolder::transfer_hold_lists)
//! stamps every pending entry with the generation that was current while it
//! was still reachable. [`trim_hold_lists`](GenerationHolder::trim_hold_lists)
//! then hands back each entry whose stamp is older than the first generation
//! any reader still uses.

use std::collections::VecDeque;

use crate::generation::Generation;

#[derive(Debug)]
struct HeldEntry<T> {
    generation: Generation,
    bytes: usize,
    item: T,
}

/// Pending and generation-stamped hold lists
#[derive(Debug)]
pub struct GenerationHolder<T> {
    pending: Vec<(usize, T)>,
    held: VecDeque<HeldEntry<T>>,
    held_bytes: usize,
}

impl<T> Default for GenerationHolder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GenerationHolder<T> {
    /// Empty holder
    pub fn new() -> Self {
        GenerationHolder {
            pending: Vec::new(),
            held: VecDeque::new(),
            held_bytes: 0,
        }
    }

    /// Retire `item`, which accounts for `bytes` of memory
    pub fn hold(&mut self, item: T, bytes: usize) {
        self.held_bytes += bytes;
        self.pending.push((bytes, item));
    }

    /// Stamp all pending entries with `generation`
    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        if let Some(last) = self.held.back() {
            debug_assert!(last.generation <= generation, "hold generations must not decrease");
        }
        for (bytes, item) in self.pending.drain(..) {
            self.held.push_back(HeldEntry {
                generation,
                bytes,
                item,
            });
        }
    }

    /// Release every entry stamped before `first_used`, oldest first
    pub fn trim_hold_lists<F>(&mut self, first_used: Generation, mut release: F)
    where
        F: FnMut(T),
    {
        while let Some(front) = self.held.front() {
            if front.generation >= first_used {
                break;
            }
            if let Some(entry) = self.held.pop_front() {
                self.held_bytes -= entry.bytes;
                release(entry.item);
            }
        }
    }

    /// Release everything, pending entries included
    pub fn clear_hold_lists<F>(&mut self, mut release: F)
    where
        F: FnMut(T),
    {
        for entry in self.held.drain(..) {
            release(entry.item);
        }
        for (_, item) in self.pending.drain(..) {
            release(item);
        }
        self.held_bytes = 0;
    }

    /// Bytes currently retired, pending or stamped
    pub fn held_bytes(&self) -> usize {
        self.held_bytes
    }

    /// Number of entries not yet released
    pub fn len(&self) -> usize {
        self.pending.len() + self.held.len()
    }

    /// Whether nothing is on hold
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
