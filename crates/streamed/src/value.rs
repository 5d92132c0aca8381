//! Values decoded from streamed blocks
//!
//! A [`StreamedValue`] is a tensor value backed directly by the bytes of an
//! encoded block. Cells are never copied. The address index is chosen at
//! decode time by [`IndexMode`]:
//!
//! - `Streamed`: queries scan the label stream in place.
//! - `Fast`: the label stream is replayed once into a [`FastValueIndex`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

use tensorcol_core::{
    invariant_violation, FastValue, FastValueIndex, Index, MemoryUsage, Result, TypedCells, Value,
    ValueType, View,
};

use crate::encoding::{BlockLayout, DataFromType, StreamedValueData};
use crate::index::StreamedView;
use crate::label_stream::LabelBlockStream;

/// Which index a decoded value carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Scan the label stream for every query
    #[default]
    Streamed,
    /// Build a hash index once per decode
    Fast,
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexMode::Streamed => f.write_str("streamed"),
            IndexMode::Fast => f.write_str("fast"),
        }
    }
}

#[derive(Debug)]
enum DecodedIndex {
    Streamed,
    Fast(FastValueIndex),
}

/// Tensor value over the bytes of one encoded block
pub struct StreamedValue<B> {
    value_type: ValueType,
    bytes: B,
    layout: BlockLayout,
    index: DecodedIndex,
}

impl<B: AsRef<[u8]>> StreamedValue<B> {
    /// The block bytes this value reads from
    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    /// Give back the underlying bytes
    pub fn into_bytes(self) -> B {
        self.bytes
    }

    /// Borrowed block view
    pub fn data(&self) -> StreamedValueData<'_> {
        StreamedValueData::with_layout(self.bytes.as_ref(), &self.layout, self.value_type.cell_type())
    }

    /// Index mode this value was decoded with
    pub fn index_mode(&self) -> IndexMode {
        match self.index {
            DecodedIndex::Streamed => IndexMode::Streamed,
            DecodedIndex::Fast(_) => IndexMode::Fast,
        }
    }

    fn labels(&self) -> &[u8] {
        &self.bytes.as_ref()[self.layout.labels.clone()]
    }
}

impl<B> fmt::Debug for StreamedValue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamedValue")
            .field("value_type", &self.value_type)
            .field("num_subspaces", &self.layout.num_subspaces)
            .field("index", &self.index)
            .finish()
    }
}

impl<B: AsRef<[u8]>> Index for StreamedValue<B> {
    fn size(&self) -> usize {
        self.layout.num_subspaces as usize
    }

    fn create_view<'a>(&'a self, dims: &[usize]) -> Box<dyn View<'a> + 'a> {
        Box::new(StreamedView::new(
            self.layout.num_mapped_dims as usize,
            self.layout.num_subspaces as usize,
            self.labels(),
            dims,
        ))
    }
}

impl<B: AsRef<[u8]>> Value for StreamedValue<B> {
    fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    fn cells(&self) -> TypedCells<'_> {
        TypedCells::new(
            self.value_type.cell_type(),
            &self.bytes.as_ref()[self.layout.cells.clone()],
        )
    }

    fn index(&self) -> &dyn Index {
        match &self.index {
            DecodedIndex::Streamed => self as &dyn Index,
            DecodedIndex::Fast(index) => index,
        }
    }

    fn memory_usage(&self) -> MemoryUsage {
        let self_size = std::mem::size_of::<Self>();
        let mut usage = MemoryUsage::new(self_size, self_size, 0, 0);
        if let DecodedIndex::Fast(index) = &self.index {
            usage.merge(index.estimate_extra_memory_usage());
        }
        usage
    }
}

fn replay_into_fast_index(num_mapped_dims: usize, num_subspaces: usize, labels: &[u8]) -> FastValueIndex {
    let mut index = FastValueIndex::new(num_mapped_dims, num_subspaces);
    let mut blocks = LabelBlockStream::new(num_subspaces, labels, num_mapped_dims);
    blocks.reset();
    while let Some(block) = blocks.next_block() {
        let mapped = index.add_mapping(block.address);
        if mapped != block.subspace {
            error!(
                target: "tensorcol::decode",
                expected = block.subspace,
                actual = mapped,
                "Subspace address already mapped"
            );
        }
    }
    if index.size() != num_subspaces {
        invariant_violation(format!(
            "fast index holds {} subspaces, block declares {}",
            index.size(),
            num_subspaces
        ));
    }
    index
}

/// Decode a block that has already been validated.
///
/// Only the header is inspected; the label stream is trusted. Bytes from
/// outside the store must go through [`StreamedValueData::from_wire`] or
/// [`decode_checked`] first.
pub fn decode<B: AsRef<[u8]>>(bytes: B, value_type: &ValueType, mode: IndexMode) -> Result<StreamedValue<B>> {
    let layout = BlockLayout::frame(bytes.as_ref(), &DataFromType::new(value_type))?;
    let index = match mode {
        IndexMode::Streamed => DecodedIndex::Streamed,
        IndexMode::Fast => DecodedIndex::Fast(replay_into_fast_index(
            layout.num_mapped_dims as usize,
            layout.num_subspaces as usize,
            &bytes.as_ref()[layout.labels.clone()],
        )),
    };
    Ok(StreamedValue {
        value_type: value_type.clone(),
        bytes,
        layout,
        index,
    })
}

/// Validate the whole block, then decode it
pub fn decode_checked<B: AsRef<[u8]>>(
    bytes: B,
    value_type: &ValueType,
    mode: IndexMode,
) -> Result<StreamedValue<B>> {
    BlockLayout::parse(bytes.as_ref(), &DataFromType::new(value_type))?;
    decode(bytes, value_type, mode)
}

/// Materialize a validated block into an owned [`FastValue`]
pub fn decode_to_fast_value(bytes: &[u8], value_type: &ValueType) -> Result<FastValue> {
    let layout = BlockLayout::frame(bytes, &DataFromType::new(value_type))?;
    let index = replay_into_fast_index(
        layout.num_mapped_dims as usize,
        layout.num_subspaces as usize,
        &bytes[layout.labels.clone()],
    );
    Ok(FastValue::from_parts(
        value_type.clone(),
        index,
        bytes[layout.cells].to_vec(),
    ))
}
