//! Generation tracking for deferred reclamation
//!
//! The writer advances a column-wide generation counter. A reader pins the
//! generation current at the time it starts by taking a [`GenerationGuard`];
//! anything retired at or after a pinned generation must stay alive until
//! the guard is dropped.
//!
//! # Design
//!
//! Each generation is represented by a shared hold object. The current hold
//! is published through `ArcSwap`, so taking a guard is a lock-free
//! `load_full`. When the writer advances, the old hold moves to a retired
//! list; a retired hold is unused once the retired list owns the only
//! reference. The oldest retired hold still in use is the first used
//! generation.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Column-wide generation number
pub type Generation = u64;

#[derive(Debug)]
struct GenerationHold {
    generation: Generation,
}

/// A reader's pin on one generation
///
/// Dropping the guard releases the pin.
#[derive(Debug, Clone)]
pub struct GenerationGuard {
    hold: Arc<GenerationHold>,
}

impl GenerationGuard {
    /// Generation this guard pins
    pub fn generation(&self) -> Generation {
        self.hold.generation
    }
}

/// Tracks the current generation and the oldest one still pinned
#[derive(Debug)]
pub struct GenerationHandler {
    current: ArcSwap<GenerationHold>,
    retired: Mutex<VecDeque<Arc<GenerationHold>>>,
    first_used: AtomicU64,
}

impl Default for GenerationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationHandler {
    /// Start at generation 0
    pub fn new() -> Self {
        GenerationHandler {
            current: ArcSwap::from_pointee(GenerationHold { generation: 0 }),
            retired: Mutex::new(VecDeque::new()),
            first_used: AtomicU64::new(0),
        }
    }

    /// Pin the current generation
    pub fn take_guard(&self) -> GenerationGuard {
        GenerationGuard {
            hold: self.current.load_full(),
        }
    }

    /// The current generation
    pub fn current_generation(&self) -> Generation {
        self.current.load().generation
    }

    /// Advance to the next generation. Writer only.
    pub fn inc_generation(&self) -> Generation {
        let next = self.current_generation() + 1;
        let old = self
            .current
            .swap(Arc::new(GenerationHold { generation: next }));
        self.retired.lock().push_back(old);
        self.update_first_used_generation();
        next
    }

    /// Drop retired holds no reader pins any more and recompute the first
    /// used generation.
    pub fn update_first_used_generation(&self) {
        let mut retired = self.retired.lock();
        while let Some(front) = retired.front() {
            if Arc::strong_count(front) > 1 {
                break;
            }
            retired.pop_front();
        }
        let first_used = match retired.front() {
            Some(hold) => hold.generation,
            None => self.current_generation(),
        };
        self.first_used.store(first_used, Ordering::Release);
    }

    /// Oldest generation a reader may still observe, as of the last update
    pub fn first_used_generation(&self) -> Generation {
        self.first_used.load(Ordering::Acquire)
    }

    /// Number of guards pinning `generation`
    pub fn generation_ref_count(&self, generation: Generation) -> usize {
        let current = self.current.load_full();
        if current.generation == generation {
            // minus the handler's own reference and the one just loaded
            return Arc::strong_count(&current) - 2;
        }
        self.retired
            .lock()
            .iter()
            .find(|hold| hold.generation == generation)
            .map(|hold| Arc::strong_count(hold) - 1)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_readers() {
        let handler = GenerationHandler::new();
        assert_eq!(handler.current_generation(), 0);
        assert_eq!(handler.inc_generation(), 1);
        assert_eq!(handler.inc_generation(), 2);
        assert_eq!(handler.first_used_generation(), 2);
    }

    #[test]
    fn test_guard_pins_generation() {
        let handler = GenerationHandler::new();
        handler.inc_generation();
        let guard = handler.take_guard();
        assert_eq!(guard.generation(), 1);
        handler.inc_generation();
        handler.inc_generation();
        assert_eq!(handler.current_generation(), 3);
        assert_eq!(handler.first_used_generation(), 1);
        drop(guard);
        handler.update_first_used_generation();
        assert_eq!(handler.first_used_generation(), 3);
    }

    #[test]
    fn test_oldest_guard_wins() {
        let handler = GenerationHandler::new();
        let g0 = handler.take_guard();
        handler.inc_generation();
        let g1 = handler.take_guard();
        handler.inc_generation();
        assert_eq!(handler.first_used_generation(), 0);
        drop(g0);
        handler.update_first_used_generation();
        assert_eq!(handler.first_used_generation(), 1);
        drop(g1);
        handler.update_first_used_generation();
        assert_eq!(handler.first_used_generation(), 2);
    }

    #[test]
    fn test_ref_count() {
        let handler = GenerationHandler::new();
        let a = handler.take_guard();
        let b = a.clone();
        assert_eq!(handler.generation_ref_count(0), 2);
        handler.inc_generation();
        assert_eq!(handler.generation_ref_count(0), 2);
        assert_eq!(handler.generation_ref_count(1), 0);
        drop((a, b));
        assert_eq!(handler.generation_ref_count(0), 0);
    }

    #[test]
    fn test_guards_across_threads() {
        let handler = Arc::new(GenerationHandler::new());
        let guards: Vec<_> = (0..4)
            .map(|_| {
                let handler = Arc::clone(&handler);
                std::thread::spawn(move || handler.take_guard())
            })
            .map(|h| h.join().unwrap())
            .collect();
        handler.inc_generation();
        assert_eq!(handler.first_used_generation(), 0);
        drop(guards);
        handler.update_first_used_generation();
        assert_eq!(handler.first_used_generation(), 1);
    }
}
