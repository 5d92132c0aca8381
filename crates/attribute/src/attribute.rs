//! Tensor attribute column
//!
//! [`TensorAttribute`] is the writer of one column: it owns the doc id to
//! handle table and the data store, and drives generations. Every mutating
//! operation takes `&mut self`; reads go through [`AttributeReader`]s that
//! share the published state.
//!
//! # Generations
//!
//! Replaced handles, retired table arrays and compacted buffers are put on
//! hold. Advancing the generation stamps pending holds with the generation
//! that was current, then releases everything older than the oldest
//! generation a reader still pins.
//!
//! ```text
//! set_tensor ---> hold old entry ---> inc_generation ---> trim: dead bytes
//!                                           |
//! commit ---> on_commit ---> dead > slack and ratio? ---> compact_worst
//! ```

use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::json;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use tensorcol_core::{DocId, FastValue, MemoryUsage, Result, Value, ValueType};
use tensorcol_storage::{
    EntryRef, Generation, GenerationGuard, RefVector, TensorData, TensorStore,
};
use tensorcol_streamed::StreamedValue;

use crate::config::AttributeConfig;
use crate::reader::{AttributeReader, ReadState, Shared};

/// Statistics refreshed by [`TensorAttribute::update_stat`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttributeStatus {
    /// Number of doc id slots
    pub num_docs: u32,
    /// Number of documents holding a value
    pub num_values: u32,
    /// Memory of the table and the store
    pub memory: MemoryUsage,
}

/// Writer of one tensor column
pub struct TensorAttribute {
    pub(crate) name: String,
    pub(crate) config: AttributeConfig,
    pub(crate) shared: Arc<Shared>,
    pub(crate) refs: RefVector,
    pub(crate) store: TensorStore,
    pub(crate) uncommitted_doc_id_limit: DocId,
    pub(crate) num_values: u32,
    pub(crate) create_serial_num: u64,
    compact_generation: Generation,
    compact_lid_space_generation: Generation,
    status: AttributeStatus,
}

impl TensorAttribute {
    /// Empty column named `name`
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let value_type = config.value_type()?;
        let refs = RefVector::new(config.grow_strategy);
        let store = TensorStore::new(value_type.clone(), config.store)?;
        let shared = Arc::new(Shared {
            generation: Default::default(),
            committed_doc_id_limit: AtomicU32::new(0),
            read_state: ArcSwap::from_pointee(ReadState {
                refs: refs.reader(),
                store: store.reader(),
            }),
            value_type,
            index_mode: config.index_mode,
        });
        debug!(
            target: "tensorcol::attribute",
            name = %name,
            tensor_type = %config.tensor_type,
            index_mode = %config.index_mode,
            "Created tensor attribute"
        );
        let mut attribute = TensorAttribute {
            name,
            config,
            shared,
            refs,
            store,
            uncommitted_doc_id_limit: 0,
            num_values: 0,
            create_serial_num: 0,
            compact_generation: 0,
            compact_lid_space_generation: 0,
            status: AttributeStatus::default(),
        };
        attribute.update_stat();
        Ok(attribute)
    }

    /// Name of the column
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the column was created with
    pub fn config(&self) -> &AttributeConfig {
        &self.config
    }

    /// Declared type of the column
    pub fn value_type(&self) -> &ValueType {
        &self.shared.value_type
    }

    /// A read handle for other threads
    pub fn reader(&self) -> AttributeReader {
        AttributeReader::new(Arc::clone(&self.shared))
    }

    /// Pin the current generation until the guard is dropped
    pub fn take_guard(&self) -> GenerationGuard {
        self.shared.generation.take_guard()
    }

    /// Number of doc id slots
    pub fn num_docs(&self) -> DocId {
        self.refs.size() as DocId
    }

    /// Doc ids below this limit are visible to reads
    pub fn committed_doc_id_limit(&self) -> DocId {
        self.shared.committed_doc_id_limit()
    }

    /// Generation at which the store was last compacted
    pub fn compact_generation(&self) -> Generation {
        self.compact_generation
    }

    /// The current generation
    pub fn current_generation(&self) -> Generation {
        self.shared.generation.current_generation()
    }

    /// Oldest generation a reader may still observe
    pub fn first_used_generation(&self) -> Generation {
        self.shared.generation.first_used_generation()
    }

    /// Serial number the column was created at
    pub fn create_serial_num(&self) -> u64 {
        self.create_serial_num
    }

    /// Set the serial number recorded by the next save
    pub fn set_create_serial_num(&mut self, serial_num: u64) {
        self.create_serial_num = serial_num;
    }

    // ========================================================================
    // Doc id space
    // ========================================================================

    /// Append an empty document
    pub fn add_doc(&mut self) -> DocId {
        let inc_generation = self.refs.is_full();
        let doc = self.num_docs();
        self.refs.push(EntryRef::invalid());
        self.uncommitted_doc_id_limit = self.uncommitted_doc_id_limit.max(doc + 1);
        if inc_generation {
            self.inc_generation();
        } else {
            self.remove_all_old_generations();
        }
        doc
    }

    /// Append `count` empty documents
    pub fn add_docs(&mut self, count: u32) -> Range<DocId> {
        let first = self.num_docs();
        for _ in 0..count {
            self.add_doc();
        }
        first..self.num_docs()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store `value` for `doc`, replacing any previous value.
    ///
    /// Fails with `WrongTensorType` if `value` cannot be stored in this
    /// column; nothing changes in that case.
    pub fn set_tensor(&mut self, doc: DocId, value: &dyn Value) -> Result<()> {
        self.check_doc(doc);
        let entry = self.store.store_tensor(value)?;
        self.set_tensor_ref(doc, entry);
        Ok(())
    }

    /// Store an already encoded block for `doc`
    pub fn set_encoded_tensor(&mut self, doc: DocId, wire: &[u8]) -> Result<()> {
        self.check_doc(doc);
        let entry = self.store.store_encoded_tensor(wire)?;
        self.set_tensor_ref(doc, entry);
        Ok(())
    }

    fn set_tensor_ref(&mut self, doc: DocId, entry: EntryRef) {
        let old = self.refs.get(doc as usize);
        self.refs.set(doc as usize, entry);
        if old.is_valid() {
            self.store.hold_tensor(old);
        } else {
            self.num_values += 1;
        }
    }

    /// Remove the value of `doc`. Returns the number of values removed.
    pub fn clear_doc(&mut self, doc: DocId) -> u32 {
        self.check_doc(doc);
        let old = self.refs.get(doc as usize);
        if !old.is_valid() {
            return 0;
        }
        self.refs.set(doc as usize, EntryRef::invalid());
        self.store.hold_tensor(old);
        self.num_values -= 1;
        1
    }

    /// Remove the values of every doc in `low..limit`
    pub fn clear_docs(&mut self, low: DocId, limit: DocId) {
        assert!(
            low <= limit && limit <= self.num_docs(),
            "cannot clear docs {}..{} of {}",
            low,
            limit,
            self.num_docs()
        );
        for doc in low..limit {
            self.clear_doc(doc);
        }
    }

    fn check_doc(&self, doc: DocId) {
        assert!(
            doc < self.num_docs(),
            "doc {} beyond doc id space {}",
            doc,
            self.num_docs()
        );
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Value of `doc` over the stored bytes. `None` for docs beyond the
    /// committed limit and for docs without a value.
    pub fn get_tensor(&self, doc: DocId) -> Option<StreamedValue<TensorData>> {
        self.shared.get_tensor(doc)
    }

    /// Owned copy of the value of `doc`
    pub fn get_tensor_copy(&self, doc: DocId) -> Option<FastValue> {
        self.shared.get_tensor_copy(doc)
    }

    /// Encoded bytes of `doc`
    pub fn get_tensor_data(&self, doc: DocId) -> Option<TensorData> {
        self.shared.get_tensor_data(doc)
    }

    /// The empty value of this column's type
    pub fn get_empty_tensor(&self) -> FastValue {
        FastValue::empty(&self.shared.value_type)
    }

    // ========================================================================
    // Generations
    // ========================================================================

    /// Make added documents visible and advance the generation
    pub fn commit(&mut self) {
        self.shared
            .committed_doc_id_limit
            .store(self.uncommitted_doc_id_limit, Ordering::Release);
        self.on_commit();
        self.update_stat();
    }

    /// Advance the generation and compact the store if it carries too much
    /// dead space. No compaction starts while the holds of the previous one
    /// may still be pinned.
    pub fn on_commit(&mut self) {
        self.inc_generation();
        if self.first_used_generation() > self.compact_generation {
            let usage = self.memory_usage();
            if self.config.compaction.should_compact(&usage) {
                self.compact_worst();
            }
        }
    }

    /// Stamp pending holds and move to the next generation
    pub fn inc_generation(&mut self) {
        let next = self.current_generation() + 1;
        self.on_generation_change(next);
        self.shared.generation.inc_generation();
        self.remove_all_old_generations();
    }

    /// Stamp pending holds with the generation before `generation`
    pub fn on_generation_change(&mut self, generation: Generation) {
        let current = generation - 1;
        self.refs.transfer_hold_lists(current);
        self.store.transfer_hold_lists(current);
    }

    /// Release holds stamped before `first_used`
    pub fn remove_old_generations(&mut self, first_used: Generation) {
        self.refs.trim_hold_lists(first_used);
        self.store.trim_hold_lists(first_used);
    }

    /// Release every hold no reader can still observe
    pub fn remove_all_old_generations(&mut self) {
        self.shared.generation.update_first_used_generation();
        let first_used = self.first_used_generation();
        self.remove_old_generations(first_used);
    }

    // ========================================================================
    // Compaction
    // ========================================================================

    /// Move the live entries out of the buffer with the most dead bytes.
    ///
    /// Returns true if a buffer was compacted. A store that runs out of
    /// buffer ids midway abandons the compaction and keeps serving the
    /// entries already moved.
    pub fn compact_worst(&mut self) -> bool {
        let buffer_id = match self.store.start_compact_worst_buffer() {
            Ok(Some(buffer_id)) => buffer_id,
            Ok(None) => return false,
            Err(e) => {
                warn!(target: "tensorcol::compaction", name = %self.name, error = %e, "Compaction not started");
                return false;
            }
        };
        for doc in 0..self.refs.size() {
            let old = self.refs.get(doc);
            match self.store.move_entry(old) {
                Ok(moved) if moved != old => self.refs.set(doc, moved),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        target: "tensorcol::compaction",
                        name = %self.name,
                        buffer_id,
                        error = %e,
                        "Compaction abandoned"
                    );
                    self.store.cancel_compact_worst_buffer(buffer_id);
                    return false;
                }
            }
        }
        self.store.finish_compact_worst_buffer(buffer_id);
        self.compact_generation = self.current_generation();
        self.inc_generation();
        self.update_stat();
        true
    }

    /// Clear every doc at or beyond `wanted_limit` and lower the committed
    /// limit to it. The slots stay allocated until [`shrink_lid_space`].
    ///
    /// [`shrink_lid_space`]: TensorAttribute::shrink_lid_space
    pub fn compact_lid_space(&mut self, wanted_limit: DocId) {
        self.commit();
        let committed = self.committed_doc_id_limit();
        assert!(
            self.uncommitted_doc_id_limit <= committed,
            "uncommitted docs during lid space compaction"
        );
        if wanted_limit < committed {
            self.clear_docs(wanted_limit, committed);
        }
        self.commit();
        self.uncommitted_doc_id_limit = wanted_limit;
        self.shared
            .committed_doc_id_limit
            .store(wanted_limit, Ordering::Release);
        self.compact_lid_space_generation = self.current_generation();
        self.inc_generation();
        info!(target: "tensorcol::attribute", name = %self.name, wanted_limit, "Compacted lid space");
    }

    /// Whether a lowered committed limit can now be made physical
    pub fn can_shrink_lid_space(&self) -> bool {
        self.committed_doc_id_limit() < self.num_docs()
            && self.compact_lid_space_generation < self.first_used_generation()
    }

    /// Cut the doc id space to `new_limit` slots.
    ///
    /// Every slot at or beyond `new_limit` must already be cleared, and
    /// `new_limit` may not be below the committed limit.
    pub fn shrink_lid_space(&mut self, new_limit: DocId) {
        let committed = self.committed_doc_id_limit();
        assert!(
            committed <= new_limit && new_limit <= self.num_docs(),
            "cannot shrink {} docs to {} with committed limit {}",
            self.num_docs(),
            new_limit,
            committed
        );
        for doc in new_limit..self.num_docs() {
            assert!(
                !self.refs.get(doc as usize).is_valid(),
                "doc {} still holds a value",
                doc
            );
        }
        self.refs.shrink(new_limit as usize);
        self.uncommitted_doc_id_limit = self.uncommitted_doc_id_limit.min(new_limit);
        self.inc_generation();
        self.update_stat();
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Memory of the handle table and the store, holds included
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = self.refs.memory_usage();
        usage.merge(self.store.memory_usage());
        usage
    }

    /// Refresh [`status`](TensorAttribute::status)
    pub fn update_stat(&mut self) {
        self.status = AttributeStatus {
            num_docs: self.num_docs(),
            num_values: self.num_values,
            memory: self.memory_usage(),
        };
    }

    /// Statistics as of the last [`update_stat`](TensorAttribute::update_stat)
    pub fn status(&self) -> AttributeStatus {
        self.status
    }

    /// Structured snapshot for diagnostics
    pub fn state(&self) -> serde_json::Value {
        json!({
            "compact_generation": self.compact_generation,
            "ref_vector": { "memory_usage": self.refs.memory_usage() },
            "tensor_store": { "memory_usage": self.store.memory_usage() },
        })
    }

    /// Install a freshly built table and store
    pub(crate) fn install(&mut self, refs: RefVector, store: TensorStore, doc_id_limit: DocId, num_values: u32) {
        self.shared.read_state.store(Arc::new(ReadState {
            refs: refs.reader(),
            store: store.reader(),
        }));
        self.refs = refs;
        self.store = store;
        self.num_values = num_values;
        self.uncommitted_doc_id_limit = doc_id_limit;
        self.shared
            .committed_doc_id_limit
            .store(doc_id_limit, Ordering::Release);
        self.inc_generation();
        self.update_stat();
    }
}

impl std::fmt::Debug for TensorAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorAttribute")
            .field("name", &self.name)
            .field("tensor_type", &self.config.tensor_type)
            .field("num_docs", &self.num_docs())
            .field("committed_doc_id_limit", &self.committed_doc_id_limit())
            .field("generation", &self.current_generation())
            .finish()
    }
}
