//! Lock-free read side of a tensor attribute

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tensorcol_core::{invariant_violation, DocId, FastValue, ValueType};
use tensorcol_storage::{
    GenerationGuard, GenerationHandler, RefVectorReader, StoreReader, TensorData,
};
use tensorcol_streamed::{decode, decode_to_fast_value, IndexMode, StreamedValue};

/// Handle table and store a reader resolves against. Replaced as a pair
/// when a column is loaded.
pub(crate) struct ReadState {
    pub(crate) refs: RefVectorReader,
    pub(crate) store: StoreReader,
}

/// State shared between the writer and every reader
pub(crate) struct Shared {
    pub(crate) generation: GenerationHandler,
    pub(crate) committed_doc_id_limit: AtomicU32,
    pub(crate) read_state: ArcSwap<ReadState>,
    pub(crate) value_type: ValueType,
    pub(crate) index_mode: IndexMode,
}

impl Shared {
    pub(crate) fn committed_doc_id_limit(&self) -> DocId {
        self.committed_doc_id_limit.load(Ordering::Acquire)
    }

    pub(crate) fn get_tensor_data(&self, doc: DocId) -> Option<TensorData> {
        if doc >= self.committed_doc_id_limit() {
            return None;
        }
        let _guard = self.generation.take_guard();
        let state = self.read_state.load();
        state
            .store
            .get_tensor_data(state.refs.acquire_entry_ref(doc as usize))
    }

    pub(crate) fn get_tensor(&self, doc: DocId) -> Option<StreamedValue<TensorData>> {
        let data = self.get_tensor_data(doc)?;
        match decode(data, &self.value_type, self.index_mode) {
            Ok(value) => Some(value),
            Err(e) => invariant_violation(format!("stored tensor of doc {} does not decode: {}", doc, e)),
        }
    }

    pub(crate) fn get_tensor_copy(&self, doc: DocId) -> Option<FastValue> {
        let data = self.get_tensor_data(doc)?;
        match decode_to_fast_value(data.as_slice(), &self.value_type) {
            Ok(value) => Some(value),
            Err(e) => invariant_violation(format!("stored tensor of doc {} does not decode: {}", doc, e)),
        }
    }
}

/// Read handle of a [`TensorAttribute`]
///
/// Cheap to clone, `Send + Sync`, and never blocks. Every read pins the
/// current generation while it resolves the document's handle; the returned
/// value keeps its own bytes alive afterwards.
///
/// [`TensorAttribute`]: crate::TensorAttribute
#[derive(Clone)]
pub struct AttributeReader {
    shared: Arc<Shared>,
}

impl AttributeReader {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        AttributeReader { shared }
    }

    /// Pin the current generation until the guard is dropped
    pub fn take_guard(&self) -> GenerationGuard {
        self.shared.generation.take_guard()
    }

    /// Doc ids below this limit are visible to reads
    pub fn committed_doc_id_limit(&self) -> DocId {
        self.shared.committed_doc_id_limit()
    }

    /// Declared type of the column
    pub fn value_type(&self) -> &ValueType {
        &self.shared.value_type
    }

    /// Value of `doc` over the stored bytes
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
}
