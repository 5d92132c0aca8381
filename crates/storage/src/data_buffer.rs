//! Append-only slot buffers
//!
//! A [`DataBuffer`] is a fixed array of write-once slots. The writer fills
//! slots in offset order; readers resolve a slot without locking. A filled
//! slot never changes, which is what makes a published [`EntryRef`] safe to
//! follow from any thread.
//!
//! [`EntryRef`]: crate::EntryRef

use std::fmt;
use std::sync::{Arc, OnceLock};

use tensorcol_core::invariant_violation;

/// Fixed per-slot overhead
pub const SLOT_SIZE: usize = std::mem::size_of::<OnceLock<Box<[u8]>>>();

/// One buffer of write-once slots
pub struct DataBuffer {
    buffer_id: u32,
    slots: Box<[OnceLock<Box<[u8]>>]>,
}

impl DataBuffer {
    /// Allocate a buffer with `capacity` empty slots
    pub fn new(buffer_id: u32, capacity: u32) -> Self {
        let slots = (0..capacity).map(|_| OnceLock::new()).collect();
        DataBuffer { buffer_id, slots }
    }

    /// Id of this buffer within its store
    pub fn buffer_id(&self) -> u32 {
        self.buffer_id
    }

    /// Number of slots
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Fill the slot at `offset`. Writer only.
    pub(crate) fn fill(&self, offset: u32, bytes: Box<[u8]>) {
        let Some(slot) = self.slots.get(offset as usize) else {
            invariant_violation(format!(
                "offset {} beyond capacity {} of buffer {}",
                offset,
                self.slots.len(),
                self.buffer_id
            ))
        };
        if slot.set(bytes).is_err() {
            invariant_violation(format!(
                "slot {} of buffer {} written twice",
                offset, self.buffer_id
            ));
        }
    }

    /// Bytes stored at `offset`, if that slot has been filled
    pub fn get(&self, offset: u32) -> Option<&[u8]> {
        self.slots.get(offset as usize)?.get().map(|b| &b[..])
    }
}

impl fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBuffer")
            .field("buffer_id", &self.buffer_id)
            .field("capacity", &self.slots.len())
            .finish()
    }
}

/// Encoded bytes of one stored tensor
///
/// Keeps its buffer alive, so the bytes stay valid for as long as this
/// handle exists, even after the store releases the buffer.
#[derive(Clone)]
pub struct TensorData {
    buffer: Arc<DataBuffer>,
    offset: u32,
}

impl TensorData {
    pub(crate) fn new(buffer: Arc<DataBuffer>, offset: u32) -> Option<Self> {
        buffer.get(offset)?;
        Some(TensorData { buffer, offset })
    }

    /// The encoded block
    pub fn as_slice(&self) -> &[u8] {
        match self.buffer.get(self.offset) {
            Some(bytes) => bytes,
            None => invariant_violation(format!(
                "slot {} of buffer {} emptied under a reader",
                self.offset,
                self.buffer.buffer_id()
            )),
        }
    }
}

impl AsRef<[u8]> for TensorData {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for TensorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorData")
            .field("buffer_id", &self.buffer.buffer_id())
            .field("offset", &self.offset)
            .field("len", &self.as_slice().len())
            .finish()
    }
}
