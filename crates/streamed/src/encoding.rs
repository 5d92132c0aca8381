//! Streamed block codec
//!
//! # Wire Format
//!
//! ```text
//! +--------------------+ 0
//! | num_mapped_dims    | u32 BE
//! +--------------------+ 4
//! | num_subspaces      | u32 BE
//! +--------------------+ 8
//! | labels             | num_subspaces * num_mapped_dims int1_4-prefixed labels,
//! |                    | subspace-major, then dimension-major
//! +--------------------+
//! | cells              | num_subspaces * dense_subspace_size cells, LE
//! +--------------------+
//! ```
//!
//! The stored form of a block is its wire form, so persisting a block is a
//! plain copy. The cell region has a size fixed by the header and the column
//! type, which lets [`BlockLayout::frame`] locate both regions without
//! scanning labels. Full validation ([`BlockLayout::parse`]) runs once, when
//! bytes enter the store.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::ops::Range;
use tensorcol_core::{
    for_each_subspace, CellType, Error, FastValueIndex, Result, TypedCells, Value, ValueType,
};

use crate::label_stream::{validate_labels, write_label, LabelBlockStream};

/// Size of the fixed block header
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Layout constants derived from a column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFromType {
    /// Mapped dimensions per address
    pub num_mapped_dimensions: usize,
    /// Cells per dense subspace
    pub dense_subspace_size: usize,
    /// Cell type of the column
    pub cell_type: CellType,
}

impl DataFromType {
    /// Derive layout constants from `value_type`
    pub fn new(value_type: &ValueType) -> Self {
        DataFromType {
            num_mapped_dimensions: value_type.count_mapped_dimensions(),
            dense_subspace_size: value_type.dense_subspace_size(),
            cell_type: value_type.cell_type(),
        }
    }

    /// Bytes of one dense subspace
    pub fn subspace_bytes(&self) -> usize {
        self.cell_type.mem_size(self.dense_subspace_size)
    }
}

/// Region offsets of one encoded block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    /// Mapped dimensions per address
    pub num_mapped_dims: u32,
    /// Number of subspaces
    pub num_subspaces: u32,
    /// Byte range of the label stream
    pub labels: Range<usize>,
    /// Byte range of the cells
    pub cells: Range<usize>,
}

impl BlockLayout {
    /// Locate the label and cell regions from the header alone.
    ///
    /// Checks the header against the column type and that the block is long
    /// enough for its cells; does not look at the labels.
    pub fn frame(bytes: &[u8], from_type: &DataFromType) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(Error::corrupt(format!(
                "block of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let num_mapped_dims = BigEndian::read_u32(&bytes[0..4]);
        let num_subspaces = BigEndian::read_u32(&bytes[4..8]);
        if num_mapped_dims as usize != from_type.num_mapped_dimensions {
            return Err(Error::corrupt(format!(
                "block has {} mapped dimensions, type has {}",
                num_mapped_dims, from_type.num_mapped_dimensions
            )));
        }
        if from_type.num_mapped_dimensions == 0 && num_subspaces != 1 {
            return Err(Error::corrupt(format!(
                "dense block declares {} subspaces",
                num_subspaces
            )));
        }
        let cells_len = (num_subspaces as usize)
            .checked_mul(from_type.subspace_bytes())
            .ok_or_else(|| Error::corrupt("cell region size overflows"))?;
        let labels_end = bytes
            .len()
            .checked_sub(cells_len)
            .filter(|&end| end >= BLOCK_HEADER_SIZE)
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "block of {} bytes cannot hold {} subspaces of {} bytes",
                    bytes.len(),
                    num_subspaces,
                    from_type.subspace_bytes()
                ))
            })?;
        Ok(BlockLayout {
            num_mapped_dims,
            num_subspaces,
            labels: BLOCK_HEADER_SIZE..labels_end,
            cells: labels_end..bytes.len(),
        })
    }

    /// Frame and fully validate a block
    pub fn parse(bytes: &[u8], from_type: &DataFromType) -> Result<Self> {
        let layout = Self::frame(bytes, from_type)?;
        let num_labels = (layout.num_subspaces as usize)
            .checked_mul(layout.num_mapped_dims as usize)
            .ok_or_else(|| Error::corrupt("label count overflows"))?;
        let labels = &bytes[layout.labels.clone()];
        validate_labels(labels, num_labels)?;
        check_unique_addresses(&layout, labels)?;
        Ok(layout)
    }
}

/// Reject a label stream that names the same address twice
fn check_unique_addresses(layout: &BlockLayout, labels: &[u8]) -> Result<()> {
    let num_mapped_dims = layout.num_mapped_dims as usize;
    let num_subspaces = layout.num_subspaces as usize;
    if num_mapped_dims == 0 || num_subspaces < 2 {
        return Ok(());
    }
    let mut seen = FastValueIndex::new(num_mapped_dims, num_subspaces);
    let mut blocks = LabelBlockStream::new(num_subspaces, labels, num_mapped_dims);
    blocks.reset();
    while let Some(block) = blocks.next_block() {
        let mapped = seen.add_mapping(block.address);
        if mapped != block.subspace {
            return Err(Error::corrupt(format!(
                "subspace {} repeats the address of subspace {}",
                block.subspace, mapped
            )));
        }
    }
    Ok(())
}

/// Borrowed view of an encoded block
#[derive(Debug, Clone, Copy)]
pub struct StreamedValueData<'a> {
    /// Mapped dimensions per address
    pub num_mapped_dims: u32,
    /// Number of subspaces
    pub num_subspaces: u32,
    /// The label stream
    pub labels_buffer: &'a [u8],
    /// All cells of the block
    pub cells_ref: TypedCells<'a>,
}

impl<'a> StreamedValueData<'a> {
    /// Apply a layout to the bytes it was computed from
    pub fn with_layout(bytes: &'a [u8], layout: &BlockLayout, cell_type: CellType) -> Self {
        StreamedValueData {
            num_mapped_dims: layout.num_mapped_dims,
            num_subspaces: layout.num_subspaces,
            labels_buffer: &bytes[layout.labels.clone()],
            cells_ref: TypedCells::new(cell_type, &bytes[layout.cells.clone()]),
        }
    }

    /// Validate wire bytes arriving from outside (the load path)
    pub fn from_wire(bytes: &'a [u8], from_type: &DataFromType) -> Result<Self> {
        let layout = BlockLayout::parse(bytes, from_type)?;
        Ok(Self::with_layout(bytes, &layout, from_type.cell_type))
    }
}

/// Append the streamed encoding of `value` to `out`
pub fn encode_value(value: &dyn Value, out: &mut Vec<u8>) -> Result<()> {
    let value_type = value.value_type();
    let num_mapped = value_type.count_mapped_dimensions();
    let dsss = value_type.dense_subspace_size();
    let cells = value.cells();
    let num_subspaces = value.index().size();
    if cells.cell_type() != value_type.cell_type() || cells.len() != num_subspaces * dsss {
        return Err(Error::InvalidArgument(format!(
            "value of type {} has {} {} cells for {} subspaces",
            value_type,
            cells.len(),
            cells.cell_type(),
            num_subspaces
        )));
    }
    let num_subspaces_u32 = u32::try_from(num_subspaces)
        .map_err(|_| Error::InvalidArgument(format!("too many subspaces: {}", num_subspaces)))?;
    let start = out.len();
    out.write_u32::<BigEndian>(num_mapped as u32)?;
    out.write_u32::<BigEndian>(num_subspaces_u32)?;

    let mut order = Vec::with_capacity(num_subspaces);
    let mut failure = None;
    for_each_subspace(value, |subspace, address| {
        if failure.is_some() {
            return;
        }
        for label in address {
            if let Err(e) = write_label(out, label) {
                failure = Some(e);
                return;
            }
        }
        order.push(subspace);
    });
    if let Some(e) = failure {
        out.truncate(start);
        return Err(e);
    }
    if order.len() != num_subspaces {
        out.truncate(start);
        return Err(Error::InvalidArgument(format!(
            "index iterated {} subspaces but reports {}",
            order.len(),
            num_subspaces
        )));
    }
    for subspace in order {
        out.extend_from_slice(cells.slice(subspace * dsss, dsss).as_bytes());
    }
    Ok(())
}

/// Encode `value` into a fresh buffer
pub fn encode(value: &dyn Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_size_hint(value));
    encode_value(value, &mut out)?;
    Ok(out)
}

fn encoded_size_hint(value: &dyn Value) -> usize {
    let value_type = value.value_type();
    let subspaces = value.index().size();
    BLOCK_HEADER_SIZE
        + subspaces * value_type.count_mapped_dimensions() * 8
        + value_type
            .cell_type()
            .mem_size(subspaces * value_type.dense_subspace_size())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorcol_core::TensorSpec;

    fn sparse_value() -> tensorcol_core::FastValue {
        let t = ValueType::from_spec("tensor(x{})").unwrap();
        TensorSpec::new(t)
            .add([("x", "a")], 1.0)
            .add([("x", "b")], 2.0)
            .to_value()
            .unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode(&sparse_value()).unwrap();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 2]);
        assert_eq!(&bytes[8..12], &[1, b'a', 1, b'b']);
        assert_eq!(bytes.len(), 12 + 16);
        assert_eq!(&bytes[12..20], &1.0f64.to_le_bytes());
    }

    #[test]
    fn test_parse_roundtrip() {
        let t = ValueType::from_spec("tensor(x{})").unwrap();
        let bytes = encode(&sparse_value()).unwrap();
        let data = StreamedValueData::from_wire(&bytes, &DataFromType::new(&t)).unwrap();
        assert_eq!(data.num_subspaces, 2);
        assert_eq!(data.labels_buffer, &[1, b'a', 1, b'b']);
        assert_eq!(data.cells_ref.get(1), 2.0);
    }

    #[test]
    fn test_wrong_dimension_count() {
        let t = ValueType::from_spec("tensor(x{},y{})").unwrap();
        let bytes = encode(&sparse_value()).unwrap();
        let err = BlockLayout::parse(&bytes, &DataFromType::new(&t)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_truncated_block() {
        let t = ValueType::from_spec("tensor(x{})").unwrap();
        let from_type = DataFromType::new(&t);
        let bytes = encode(&sparse_value()).unwrap();
        for len in [0, 4, 7, 8, 20, bytes.len() - 1] {
            assert!(
                BlockLayout::parse(&bytes[..len], &from_type).is_err(),
                "length {} accepted",
                len
            );
        }
    }

    #[test]
    fn test_bad_label_prefix() {
        let t = ValueType::from_spec("tensor(x{})").unwrap();
        let mut bytes = encode(&sparse_value()).unwrap();
        bytes[8] = 3;
        let from_type = DataFromType::new(&t);
        assert!(BlockLayout::frame(&bytes, &from_type).is_ok());
        assert!(BlockLayout::parse(&bytes, &from_type).unwrap_err().is_corruption());
    }

    #[test]
    fn test_repeated_address_rejected() {
        let t = ValueType::from_spec("tensor(x{})").unwrap();
        let from_type = DataFromType::new(&t);
        let mut bytes = vec![0, 0, 0, 1, 0, 0, 0, 2, 1, b'a', 1, b'a'];
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        bytes.extend_from_slice(&2.0f64.to_le_bytes());
        assert!(BlockLayout::frame(&bytes, &from_type).is_ok());
        let err = BlockLayout::parse(&bytes, &from_type).unwrap_err();
        assert!(err.is_corruption());
        assert!(StreamedValueData::from_wire(&bytes, &from_type).is_err());
    }

    #[test]
    fn test_dense_block_has_one_subspace() {
        let t = ValueType::from_spec("tensor<float>(x[1])").unwrap();
        let value = TensorSpec::new(t.clone())
            .add([("x", 0u32)], 4.0)
            .to_value()
            .unwrap();
        let bytes = encode(&value).unwrap();
        assert_eq!(bytes.len(), 12);
        let layout = BlockLayout::parse(&bytes, &DataFromType::new(&t)).unwrap();
        assert_eq!(layout.labels, 8..8);
        assert_eq!(layout.cells, 8..12);
    }

    #[test]
    fn test_empty_sparse() {
        let t = ValueType::from_spec("tensor(x{})").unwrap();
        let value = tensorcol_core::FastValue::empty(&t);
        let bytes = encode(&value).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 1, 0, 0, 0, 0]);
        let layout = BlockLayout::parse(&bytes, &DataFromType::new(&t)).unwrap();
        assert_eq!(layout.num_subspaces, 0);
    }
}
