//! Memory usage accounting
//!
//! Every layer of the column reports the same four numbers so they can be
//! merged into one column-wide figure.

use serde::{Deserialize, Serialize};

/// Memory usage of a component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Bytes allocated from the system
    pub allocated_bytes: usize,
    /// Bytes in use, live or dead
    pub used_bytes: usize,
    /// Bytes no longer referenced and not yet reclaimed
    pub dead_bytes: usize,
    /// Bytes retired but possibly still visible to readers
    pub allocated_bytes_on_hold: usize,
}

impl MemoryUsage {
    /// Create a usage report
    pub fn new(allocated_bytes: usize, used_bytes: usize, dead_bytes: usize, on_hold: usize) -> Self {
        MemoryUsage {
            allocated_bytes,
            used_bytes,
            dead_bytes,
            allocated_bytes_on_hold: on_hold,
        }
    }

    /// Add `other` to this report
    pub fn merge(&mut self, other: MemoryUsage) {
        self.allocated_bytes += other.allocated_bytes;
        self.used_bytes += other.used_bytes;
        self.dead_bytes += other.dead_bytes;
        self.allocated_bytes_on_hold += other.allocated_bytes_on_hold;
    }

    /// Account for whole allocations held by a generation holder
    pub fn merge_generation_held_bytes(&mut self, held: usize) {
        self.allocated_bytes += held;
        self.allocated_bytes_on_hold += held;
    }

    /// Bytes that are in use and still referenced
    pub fn live_bytes(&self) -> usize {
        self.used_bytes.saturating_sub(self.dead_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge() {
        let mut a = MemoryUsage::new(100, 50, 10, 5);
        a.merge(MemoryUsage::new(10, 5, 1, 0));
        assert_eq!(a, MemoryUsage::new(110, 55, 11, 5));
        assert_eq!(a.live_bytes(), 44);
    }

    #[test]
    fn test_merge_generation_held() {
        let mut a = MemoryUsage::default();
        a.merge_generation_held_bytes(64);
        assert_eq!(a.allocated_bytes, 64);
        assert_eq!(a.allocated_bytes_on_hold, 64);
        assert_eq!(a.used_bytes, 0);
    }

    #[test]
    fn test_serializes() {
        let json = serde_json::to_value(MemoryUsage::new(1, 2, 3, 4)).unwrap();
        assert_eq!(json["dead_bytes"], 3);
        assert_eq!(json["allocated_bytes_on_hold"], 4);
    }
}
