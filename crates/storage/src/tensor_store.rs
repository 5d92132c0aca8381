//! Generation-reclaimed store for encoded tensors
//!
//! # Structure
//!
//! The store is a table of up to [`MAX_BUFFERS`] [`DataBuffer`]s. New
//! entries go into the single active buffer; when it fills up a new buffer
//! is allocated under the lowest free buffer id. Buffers are published
//! through `ArcSwapOption`, so a [`StoreReader`] resolves an [`EntryRef`]
//! without locking.
//!
//! # Reclamation
//!
//! Nothing is freed directly. Replaced entries are put on hold and become
//! dead bytes once no reader can see them. Dead space is recovered by
//! compacting the worst buffer: live entries are copied out, their handles
//! rewritten by the caller, and the whole old buffer is put on hold. When
//! that hold drains the buffer id becomes free again.
//!
//! ```text
//! store_tensor --> Active buffer --hold_tensor--> entry on hold --trim--> dead bytes
//!                                                                           |
//!                  Free id <--trim-- buffer on hold <--compact worst buffer--'
//! ```

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use tensorcol_core::{invariant_violation, Error, MemoryUsage, Result, Value, ValueType};
use tensorcol_streamed::{encode, BlockLayout, DataFromType};

use crate::data_buffer::{DataBuffer, TensorData, SLOT_SIZE};
use crate::entry_ref::{EntryRef, MAX_BUFFERS, MAX_BUFFER_ENTRIES};
use crate::generation::Generation;
use crate::generation_holder::GenerationHolder;

/// Buffer sizing policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Smallest number of slots in a new buffer
    pub min_entries_per_buffer: u32,
    /// Largest number of slots in a new buffer
    pub max_entries_per_buffer: u32,
    /// New buffer size as a fraction of the entries already stored
    pub alloc_grow_factor: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            min_entries_per_buffer: 1024,
            max_entries_per_buffer: MAX_BUFFER_ENTRIES,
            alloc_grow_factor: 0.2,
        }
    }
}

impl StoreConfig {
    /// Check the limits are usable
    pub fn validate(&self) -> Result<()> {
        if self.min_entries_per_buffer < 2 {
            return Err(Error::Config(format!(
                "min_entries_per_buffer must be at least 2, got {}",
                self.min_entries_per_buffer
            )));
        }
        if self.max_entries_per_buffer > MAX_BUFFER_ENTRIES {
            return Err(Error::Config(format!(
                "max_entries_per_buffer must be at most {}, got {}",
                MAX_BUFFER_ENTRIES, self.max_entries_per_buffer
            )));
        }
        if self.min_entries_per_buffer > self.max_entries_per_buffer {
            return Err(Error::Config(format!(
                "min_entries_per_buffer {} exceeds max_entries_per_buffer {}",
                self.min_entries_per_buffer, self.max_entries_per_buffer
            )));
        }
        if self.alloc_grow_factor.is_nan() || self.alloc_grow_factor < 0.0 {
            return Err(Error::Config(format!(
                "alloc_grow_factor must be non-negative, got {}",
                self.alloc_grow_factor
            )));
        }
        Ok(())
    }

    fn capacity_for(&self, stored_entries: usize) -> u32 {
        let wanted = (stored_entries as f64 * self.alloc_grow_factor) as u64;
        wanted.clamp(
            self.min_entries_per_buffer as u64,
            self.max_entries_per_buffer as u64,
        ) as u32
    }
}

/// Lifecycle state of one buffer id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferStatus {
    /// Not allocated
    #[default]
    Free,
    /// Allocated and holding entries
    Active,
    /// Retired by compaction, waiting for readers to drain
    Hold,
}

/// Writer-side bookkeeping of one buffer
#[derive(Debug, Clone, Default)]
struct BufferState {
    status: BufferStatus,
    capacity: u32,
    next_offset: u32,
    payload_bytes: usize,
    dead_bytes: usize,
    hold_bytes: usize,
}

impl BufferState {
    fn allocated_bytes(&self) -> usize {
        self.capacity as usize * SLOT_SIZE + self.payload_bytes
    }

    fn used_bytes(&self) -> usize {
        self.next_offset as usize * SLOT_SIZE + self.payload_bytes
    }

    fn has_room(&self) -> bool {
        self.status == BufferStatus::Active && self.next_offset < self.capacity
    }
}

#[derive(Debug)]
enum HeldItem {
    Entry { entry: EntryRef, bytes: usize },
    Buffer { buffer_id: u32 },
}

#[derive(Debug)]
struct Compaction {
    buffer_id: u32,
    moved: Vec<EntryRef>,
}

struct BufferTable {
    buffers: Box<[ArcSwapOption<DataBuffer>]>,
}

impl BufferTable {
    fn new() -> Self {
        BufferTable {
            buffers: (0..MAX_BUFFERS).map(|_| ArcSwapOption::empty()).collect(),
        }
    }
}

fn entry_size(payload_len: usize) -> usize {
    SLOT_SIZE + payload_len
}

/// Read side of the store
#[derive(Clone)]
pub struct StoreReader {
    table: Arc<BufferTable>,
}

impl StoreReader {
    /// Resolve `entry` to its encoded bytes. `None` for the invalid handle.
    pub fn get_tensor_data(&self, entry: EntryRef) -> Option<TensorData> {
        if !entry.is_valid() {
            return None;
        }
        let Some(buffer) = self.table.buffers[entry.buffer_id() as usize].load_full() else {
            invariant_violation(format!("{:?} resolves into a released buffer", entry))
        };
        match TensorData::new(buffer, entry.offset()) {
            Some(data) => Some(data),
            None => invariant_violation(format!("{:?} resolves to an empty slot", entry)),
        }
    }
}

/// Writer side of the store
pub struct TensorStore {
    value_type: ValueType,
    from_type: DataFromType,
    config: StoreConfig,
    table: Arc<BufferTable>,
    states: Vec<BufferState>,
    active: Option<u32>,
    holder: GenerationHolder<HeldItem>,
    compaction: Option<Compaction>,
}

impl TensorStore {
    /// Empty store for values of `value_type`
    pub fn new(value_type: ValueType, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(TensorStore {
            from_type: DataFromType::new(&value_type),
            value_type,
            config,
            table: Arc::new(BufferTable::new()),
            states: vec![BufferState::default(); MAX_BUFFERS as usize],
            active: None,
            holder: GenerationHolder::new(),
            compaction: None,
        })
    }

    /// Type of every stored value
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// Reader handle sharing this store
    pub fn reader(&self) -> StoreReader {
        StoreReader {
            table: Arc::clone(&self.table),
        }
    }

    /// Encode and store `value`
    pub fn store_tensor(&mut self, value: &dyn Value) -> Result<EntryRef> {
        if !self.value_type.is_assignable_from(value.value_type()) {
            return Err(Error::WrongTensorType {
                expected: self.value_type.to_spec(),
                actual: value.value_type().to_spec(),
            });
        }
        let bytes = encode(value)?;
        self.add_entry(bytes.into_boxed_slice())
    }

    /// Validate and store an already encoded block
    pub fn store_encoded_tensor(&mut self, wire: &[u8]) -> Result<EntryRef> {
        BlockLayout::parse(wire, &self.from_type)?;
        self.add_entry(wire.into())
    }

    /// Resolve `entry` to its encoded bytes
    pub fn get_tensor_data(&self, entry: EntryRef) -> Option<TensorData> {
        self.reader().get_tensor_data(entry)
    }

    /// Append the wire form of `entry` to `out`. Returns false for the
    /// invalid handle.
    pub fn encode_tensor(&self, entry: EntryRef, out: &mut Vec<u8>) -> bool {
        match self.get_tensor_data(entry) {
            Some(data) => {
                out.extend_from_slice(data.as_slice());
                true
            }
            None => false,
        }
    }

    /// Retire `entry`. Its bytes stay readable until the hold is trimmed.
    pub fn hold_tensor(&mut self, entry: EntryRef) {
        if !entry.is_valid() {
            return;
        }
        let bytes = match self.get_tensor_data(entry) {
            Some(data) => entry_size(data.as_slice().len()),
            None => return,
        };
        self.states[entry.buffer_id() as usize].hold_bytes += bytes;
        self.holder.hold(HeldItem::Entry { entry, bytes }, bytes);
    }

    /// Stamp pending holds with `generation`
    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.holder.transfer_hold_lists(generation);
    }

    /// Release holds stamped before `first_used`
    pub fn trim_hold_lists(&mut self, first_used: Generation) {
        let states = &mut self.states;
        let table = &self.table;
        self.holder
            .trim_hold_lists(first_used, |item| release_held(states, table, item));
    }

    /// Release every hold regardless of generation
    pub fn clear_hold_lists(&mut self) {
        let states = &mut self.states;
        let table = &self.table;
        self.holder
            .clear_hold_lists(|item| release_held(states, table, item));
    }

    /// Memory of all buffers, including those on hold
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        for state in &self.states {
            match state.status {
                BufferStatus::Free => {}
                BufferStatus::Active => usage.merge(MemoryUsage::new(
                    state.allocated_bytes(),
                    state.used_bytes(),
                    state.dead_bytes,
                    state.hold_bytes,
                )),
                BufferStatus::Hold => usage.merge_generation_held_bytes(state.allocated_bytes()),
            }
        }
        usage
    }

    /// Status of `buffer_id`
    pub fn buffer_status(&self, buffer_id: u32) -> BufferStatus {
        self.states[buffer_id as usize].status
    }

    /// Number of buffer ids not free
    pub fn num_buffers_in_use(&self) -> usize {
        self.states
            .iter()
            .filter(|s| s.status != BufferStatus::Free)
            .count()
    }

    /// Buffer receiving new entries
    pub fn active_buffer_id(&self) -> Option<u32> {
        self.active
    }

    // ========================================================================
    // Compaction
    // ========================================================================

    /// Pick the active buffer with the most dead bytes and prepare to move
    /// its live entries out.
    ///
    /// Returns `None` when no buffer has dead entries. If the chosen buffer
    /// is the one receiving new entries, allocation switches to a fresh
    /// buffer first.
    pub fn start_compact_worst_buffer(&mut self) -> Result<Option<u32>> {
        assert!(self.compaction.is_none(), "compaction already in progress");
        let worst = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == BufferStatus::Active && s.dead_bytes > SLOT_SIZE)
            .max_by_key(|(_, s)| s.dead_bytes)
            .map(|(id, _)| id as u32);
        let Some(buffer_id) = worst else {
            return Ok(None);
        };
        if self.active == Some(buffer_id) {
            self.switch_active_buffer()?;
        }
        debug!(
            target: "tensorcol::compaction",
            buffer_id,
            dead_bytes = self.states[buffer_id as usize].dead_bytes,
            "Compacting worst buffer"
        );
        self.compaction = Some(Compaction {
            buffer_id,
            moved: Vec::new(),
        });
        Ok(Some(buffer_id))
    }

    /// Copy `entry` out of the buffer being compacted.
    ///
    /// Returns the new handle, or `entry` unchanged if it lives elsewhere.
    pub fn move_entry(&mut self, entry: EntryRef) -> Result<EntryRef> {
        let buffer_id = match &self.compaction {
            Some(c) => c.buffer_id,
            None => return Ok(entry),
        };
        if !entry.is_valid() || entry.buffer_id() != buffer_id {
            return Ok(entry);
        }
        let bytes: Box<[u8]> = match self.get_tensor_data(entry) {
            Some(data) => data.as_slice().into(),
            None => return Ok(entry),
        };
        let moved = self.add_entry(bytes)?;
        if let Some(c) = self.compaction.as_mut() {
            c.moved.push(entry);
        }
        Ok(moved)
    }

    /// Retire the compacted buffer. Every handle into it must have been
    /// rewritten already.
    pub fn finish_compact_worst_buffer(&mut self, buffer_id: u32) {
        let compaction = match self.compaction.take() {
            Some(c) if c.buffer_id == buffer_id => c,
            other => invariant_violation(format!(
                "finishing compaction of buffer {} while {:?} is in progress",
                buffer_id, other
            )),
        };
        let state = &mut self.states[buffer_id as usize];
        state.status = BufferStatus::Hold;
        let bytes = state.allocated_bytes();
        self.holder.hold(HeldItem::Buffer { buffer_id }, bytes);
        info!(
            target: "tensorcol::compaction",
            buffer_id,
            moved = compaction.moved.len(),
            bytes,
            "Compacted buffer put on hold"
        );
    }

    /// Abandon a compaction. Entries already copied out are held like any
    /// replaced entry.
    pub fn cancel_compact_worst_buffer(&mut self, buffer_id: u32) {
        let Some(compaction) = self.compaction.take() else {
            return;
        };
        debug_assert_eq!(compaction.buffer_id, buffer_id);
        for entry in compaction.moved {
            self.hold_tensor(entry);
        }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    fn add_entry(&mut self, bytes: Box<[u8]>) -> Result<EntryRef> {
        let buffer_id = match self.active {
            Some(id) if self.states[id as usize].has_room() => id,
            _ => self.switch_active_buffer()?,
        };
        let state = &mut self.states[buffer_id as usize];
        let offset = state.next_offset;
        state.next_offset += 1;
        state.payload_bytes += bytes.len();
        let buffer = self.table.buffers[buffer_id as usize].load();
        match &*buffer {
            Some(buffer) => buffer.fill(offset, bytes),
            None => invariant_violation(format!("active buffer {} is not published", buffer_id)),
        }
        Ok(EntryRef::new(buffer_id, offset))
    }

    fn switch_active_buffer(&mut self) -> Result<u32> {
        let buffer_id = self
            .states
            .iter()
            .position(|s| s.status == BufferStatus::Free)
            .ok_or(Error::StoreFull {
                max_buffers: MAX_BUFFERS,
            })? as u32;
        let stored_entries: usize = self
            .states
            .iter()
            .filter(|s| s.status == BufferStatus::Active)
            .map(|s| s.next_offset as usize)
            .sum();
        let capacity = self.config.capacity_for(stored_entries);
        self.table.buffers[buffer_id as usize].store(Some(Arc::new(DataBuffer::new(buffer_id, capacity))));
        self.states[buffer_id as usize] = BufferState {
            status: BufferStatus::Active,
            capacity,
            // slot 0 is reserved so no handle packs to zero
            next_offset: 1,
            payload_bytes: 0,
            dead_bytes: SLOT_SIZE,
            hold_bytes: 0,
        };
        self.active = Some(buffer_id);
        debug!(target: "tensorcol::store", buffer_id, capacity, "Allocated data buffer");
        Ok(buffer_id)
    }
}

fn release_held(states: &mut [BufferState], table: &BufferTable, item: HeldItem) {
    match item {
        HeldItem::Entry { entry, bytes } => {
            let state = &mut states[entry.buffer_id() as usize];
            if state.status == BufferStatus::Free {
                return;
            }
            state.hold_bytes -= bytes;
            state.dead_bytes += bytes;
        }
        HeldItem::Buffer { buffer_id } => {
            table.buffers[buffer_id as usize].store(None);
            states[buffer_id as usize] = BufferState::default();
            debug!(target: "tensorcol::store", buffer_id, "Released data buffer");
        }
    }
}
