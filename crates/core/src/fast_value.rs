//! In-memory tensor value with a hash-map index
//!
//! [`FastValueIndex`] is the general-purpose address index: subspaces are
//! numbered in insertion order and found through an `FxHashMap` keyed by the
//! hash of their address. [`FastValue`] owns an index plus little-endian
//! cell bytes and is the value type callers build and the store hands out
//! when a fully materialized copy is wanted.

use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};

use crate::cell_type::TypedCells;
use crate::memory_usage::MemoryUsage;
use crate::value::{Index, Value, View};
use crate::value_type::ValueType;

fn hash_address<'b, I>(labels: I) -> u64
where
    I: IntoIterator<Item = &'b [u8]>,
{
    let mut hasher = FxHasher::default();
    for label in labels {
        label.hash(&mut hasher);
    }
    hasher.finish()
}

/// Hash-map based address index
#[derive(Debug, Clone, Default)]
pub struct FastValueIndex {
    num_mapped_dims: usize,
    num_subspaces: usize,
    /// Labels of all subspaces, subspace-major
    labels: Vec<Box<[u8]>>,
    /// Address hash -> subspaces with that hash
    map: FxHashMap<u64, SmallVec<[usize; 1]>>,
}

impl FastValueIndex {
    /// Create an empty index
    pub fn new(num_mapped_dims: usize, expected_subspaces: usize) -> Self {
        let mut map = FxHashMap::default();
        map.reserve(expected_subspaces);
        FastValueIndex {
            num_mapped_dims,
            num_subspaces: 0,
            labels: Vec::with_capacity(expected_subspaces * num_mapped_dims),
            map,
        }
    }

    /// Number of mapped dimensions
    pub fn num_mapped_dims(&self) -> usize {
        self.num_mapped_dims
    }

    /// Labels of subspace `subspace`
    pub fn address(&self, subspace: usize) -> &[Box<[u8]>] {
        let d = self.num_mapped_dims;
        &self.labels[subspace * d..(subspace + 1) * d]
    }

    fn matches(&self, subspace: usize, addr: &[&[u8]]) -> bool {
        self.address(subspace)
            .iter()
            .zip(addr)
            .all(|(have, want)| &have[..] == *want)
    }

    /// Find the subspace with exactly this address
    pub fn lookup(&self, addr: &[&[u8]]) -> Option<usize> {
        debug_assert_eq!(addr.len(), self.num_mapped_dims);
        let hash = hash_address(addr.iter().copied());
        self.map
            .get(&hash)?
            .iter()
            .copied()
            .find(|&ss| self.matches(ss, addr))
    }

    /// Insert `addr` if missing and return its subspace index.
    ///
    /// A new address gets the next index in sequence; an existing one
    /// returns its old index.
    pub fn add_mapping(&mut self, addr: &[&[u8]]) -> usize {
        assert_eq!(addr.len(), self.num_mapped_dims, "address arity mismatch");
        let hash = hash_address(addr.iter().copied());
        if let Some(existing) = self.map.get(&hash) {
            if let Some(ss) = existing.iter().copied().find(|&ss| self.matches(ss, addr)) {
                return ss;
            }
        }
        let ss = self.num_subspaces;
        self.labels.extend(addr.iter().map(|l| Box::<[u8]>::from(*l)));
        self.map.entry(hash).or_default().push(ss);
        self.num_subspaces += 1;
        ss
    }

    /// Estimate of heap memory used by the index
    pub fn estimate_extra_memory_usage(&self) -> MemoryUsage {
        let label_bytes: usize = self.labels.iter().map(|l| l.len()).sum();
        let vec_bytes = self.labels.capacity() * std::mem::size_of::<Box<[u8]>>();
        let map_bytes = self.map.capacity()
            * (std::mem::size_of::<u64>() + std::mem::size_of::<SmallVec<[usize; 1]>>());
        let used = label_bytes
            + self.labels.len() * std::mem::size_of::<Box<[u8]>>()
            + self.map.len() * (std::mem::size_of::<u64>() + std::mem::size_of::<SmallVec<[usize; 1]>>());
        MemoryUsage::new(label_bytes + vec_bytes + map_bytes, used, 0, 0)
    }
}

impl Index for FastValueIndex {
    fn size(&self) -> usize {
        self.num_subspaces
    }

    fn create_view<'a>(&'a self, dims: &[usize]) -> Box<dyn View<'a> + 'a> {
        Box::new(FastView::new(self, dims))
    }
}

/// View over a [`FastValueIndex`].
///
/// A view over every mapped dimension answers through the hash map; partial
/// views scan subspaces in index order.
struct FastView<'a> {
    index: &'a FastValueIndex,
    dims: SmallVec<[usize; 4]>,
    to_match: SmallVec<[Vec<u8>; 4]>,
    pos: usize,
    exact: Option<usize>,
}

impl<'a> FastView<'a> {
    fn new(index: &'a FastValueIndex, dims: &[usize]) -> Self {
        debug_assert!(dims.windows(2).all(|w| w[0] < w[1]));
        FastView {
            index,
            dims: dims.iter().copied().collect(),
            to_match: SmallVec::new(),
            pos: 0,
            exact: None,
        }
    }

    fn full_lookup(&self) -> bool {
        !self.dims.is_empty() && self.dims.len() == self.index.num_mapped_dims
    }
}

impl<'a> View<'a> for FastView<'a> {
    fn lookup(&mut self, addr: &[&[u8]]) {
        assert_eq!(addr.len(), self.dims.len(), "lookup arity mismatch");
        self.pos = 0;
        self.to_match.resize_with(addr.len(), Vec::new);
        for (slot, label) in self.to_match.iter_mut().zip(addr) {
            slot.clear();
            slot.extend_from_slice(label);
        }
        self.exact = if self.full_lookup() {
            self.index.lookup(addr)
        } else {
            None
        };
    }

    fn next_result(&mut self, addr_out: &mut [&'a [u8]]) -> Option<usize> {
        if self.full_lookup() {
            return self.exact.take();
        }
        let index = self.index;
        while self.pos < index.num_subspaces {
            let ss = self.pos;
            self.pos += 1;
            let address = index.address(ss);
            let mut matches = true;
            let mut out_idx = 0;
            let mut vdm_idx = 0;
            for (dim, label) in address.iter().enumerate() {
                if vdm_idx < self.dims.len() && self.dims[vdm_idx] == dim {
                    if label[..] != self.to_match[vdm_idx][..] {
                        matches = false;
                        break;
                    }
                    vdm_idx += 1;
                } else {
                    addr_out[out_idx] = &label[..];
                    out_idx += 1;
                }
            }
            if matches {
                return Some(ss);
            }
        }
        None
    }
}

/// Owned tensor value
#[derive(Debug, Clone)]
pub struct FastValue {
    value_type: ValueType,
    index: FastValueIndex,
    cells: Vec<u8>,
}

impl FastValue {
    /// Assemble a value from parts. `cells` must hold
    /// `index.size() * dense_subspace_size` cells of the type's cell type.
    pub fn from_parts(value_type: ValueType, index: FastValueIndex, cells: Vec<u8>) -> Self {
        debug_assert_eq!(
            cells.len(),
            value_type
                .cell_type()
                .mem_size(index.size() * value_type.dense_subspace_size())
        );
        FastValue {
            value_type,
            index,
            cells,
        }
    }

    /// Empty value of the given type. Dense types get one zero subspace.
    pub fn empty(value_type: &ValueType) -> Self {
        FastValueBuilder::new(value_type.clone(), 0).build()
    }

    /// The hash index
    pub fn fast_index(&self) -> &FastValueIndex {
        &self.index
    }
}

impl Value for FastValue {
    fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    fn cells(&self) -> TypedCells<'_> {
        TypedCells::new(self.value_type.cell_type(), &self.cells)
    }

    fn index(&self) -> &dyn Index {
        &self.index
    }

    fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::new(
            std::mem::size_of::<Self>() + self.cells.capacity(),
            std::mem::size_of::<Self>() + self.cells.len(),
            0,
            0,
        );
        usage.merge(self.index.estimate_extra_memory_usage());
        usage
    }
}

/// Incremental builder for [`FastValue`]
#[derive(Debug)]
pub struct FastValueBuilder {
    value_type: ValueType,
    dense_subspace_size: usize,
    index: FastValueIndex,
    cells: Vec<u8>,
}

impl FastValueBuilder {
    /// Start building a value of `value_type`
    pub fn new(value_type: ValueType, expected_subspaces: usize) -> Self {
        let dsss = value_type.dense_subspace_size();
        let num_mapped = value_type.count_mapped_dimensions();
        let cells = Vec::with_capacity(value_type.cell_type().mem_size(dsss * expected_subspaces));
        FastValueBuilder {
            value_type,
            dense_subspace_size: dsss,
            index: FastValueIndex::new(num_mapped, expected_subspaces),
            cells,
        }
    }

    /// Cell bytes of the subspace at `addr`, created zero-filled if missing
    pub fn subspace_mut(&mut self, addr: &[&[u8]]) -> &mut [u8] {
        let ss = self.index.add_mapping(addr);
        let bytes_per = self.value_type.cell_type().mem_size(self.dense_subspace_size);
        let needed = (ss + 1) * bytes_per;
        if self.cells.len() < needed {
            self.cells.resize(needed, 0);
        }
        &mut self.cells[ss * bytes_per..needed]
    }

    /// Set all cells of the subspace at `addr`
    pub fn add_subspace(&mut self, addr: &[&[u8]], values: &[f64]) -> &mut Self {
        assert_eq!(values.len(), self.dense_subspace_size, "subspace size mismatch");
        let cell_type = self.value_type.cell_type();
        let cells = self.subspace_mut(addr);
        for (i, v) in values.iter().enumerate() {
            cell_type.write_cell(cells, i, *v);
        }
        self
    }

    /// Finish the value
    pub fn build(mut self) -> FastValue {
        if self.index.num_mapped_dims() == 0 && self.index.size() == 0 {
            self.subspace_mut(&[]);
        }
        FastValue::from_parts(self.value_type, self.index, self.cells)
    }
}
