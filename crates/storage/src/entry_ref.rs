//! Packed handles into the data store
//!
//! An [`EntryRef`] is a 32-bit `(buffer_id, offset)` pair:
//!
//! ```text
//!  31            22 21                          0
//! +----------------+-----------------------------+
//! |   buffer_id    |           offset            |
//! +----------------+-----------------------------+
//!       10 bits               22 bits
//! ```
//!
//! The all-zero value is the invalid handle. Offset 0 of every buffer is
//! reserved, so no stored entry ever packs to zero.

use std::fmt;

/// Bits used for the offset within a buffer
pub const OFFSET_BITS: u32 = 22;

/// Bits used for the buffer id
pub const BUFFER_ID_BITS: u32 = 32 - OFFSET_BITS;

/// Number of addressable buffers
pub const MAX_BUFFERS: u32 = 1 << BUFFER_ID_BITS;

/// Number of addressable slots per buffer, including the reserved slot 0
pub const MAX_BUFFER_ENTRIES: u32 = 1 << OFFSET_BITS;

const OFFSET_MASK: u32 = MAX_BUFFER_ENTRIES - 1;

/// Handle to one stored entry
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct EntryRef(u32);

impl EntryRef {
    /// Pack a buffer id and offset
    ///
    /// # Panics
    ///
    /// If either part is out of range, or the result would be the invalid
    /// handle.
    pub fn new(buffer_id: u32, offset: u32) -> Self {
        assert!(buffer_id < MAX_BUFFERS, "buffer id {} out of range", buffer_id);
        assert!(
            offset > 0 && offset < MAX_BUFFER_ENTRIES,
            "offset {} out of range",
            offset
        );
        EntryRef((buffer_id << OFFSET_BITS) | offset)
    }

    /// The invalid handle ("no value")
    #[inline]
    pub const fn invalid() -> Self {
        EntryRef(0)
    }

    /// Rebuild a handle from its packed form
    #[inline]
    pub const fn from_u32(raw: u32) -> Self {
        EntryRef(raw)
    }

    /// Packed form
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Whether this handle refers to an entry
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Buffer the entry lives in
    #[inline]
    pub const fn buffer_id(self) -> u32 {
        self.0 >> OFFSET_BITS
    }

    /// Slot of the entry within its buffer
    #[inline]
    pub const fn offset(self) -> u32 {
        self.0 & OFFSET_MASK
    }
}

impl fmt::Debug for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "EntryRef({}:{})", self.buffer_id(), self.offset())
        } else {
            f.write_str("EntryRef(invalid)")
        }
    }
}
