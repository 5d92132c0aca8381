//! Index over an encoded label stream
//!
//! [`StreamedValueIndex`] answers address queries directly from the label
//! bytes of an encoded block, without building any lookup structure. Every
//! query is a linear scan, which is cheap for the small subspace counts
//! typical of stored documents.

use smallvec::SmallVec;
use tensorcol_core::{Index, View};

use crate::label_stream::LabelBlockStream;

/// Index borrowing the label stream of one encoded block
#[derive(Debug, Clone, Copy)]
pub struct StreamedValueIndex<'a> {
    num_mapped_dims: usize,
    num_subspaces: usize,
    labels_buffer: &'a [u8],
}

impl<'a> StreamedValueIndex<'a> {
    /// Wrap a label buffer that has already been validated
    pub fn new(num_mapped_dims: usize, num_subspaces: usize, labels_buffer: &'a [u8]) -> Self {
        StreamedValueIndex {
            num_mapped_dims,
            num_subspaces,
            labels_buffer,
        }
    }

    /// Number of mapped dimensions
    pub fn num_mapped_dims(&self) -> usize {
        self.num_mapped_dims
    }

    /// The raw label bytes
    pub fn labels_buffer(&self) -> &'a [u8] {
        self.labels_buffer
    }
}

impl<'a> Index for StreamedValueIndex<'a> {
    fn size(&self) -> usize {
        self.num_subspaces
    }

    fn create_view<'v>(&'v self, dims: &[usize]) -> Box<dyn View<'v> + 'v> {
        Box::new(StreamedView::new(
            self.num_mapped_dims,
            self.num_subspaces,
            self.labels_buffer,
            dims,
        ))
    }
}

/// Scan cursor over a label stream
#[derive(Debug)]
pub(crate) enum StreamedView<'a> {
    /// No dimensions bound: yields every subspace with its full address
    Iteration { blocks: LabelBlockStream<'a> },
    /// Some dimensions bound: yields subspaces whose labels match
    Filter {
        blocks: LabelBlockStream<'a>,
        view_dims: SmallVec<[usize; 4]>,
        to_match: SmallVec<[Vec<u8>; 4]>,
    },
}

impl<'a> StreamedView<'a> {
    pub(crate) fn new(
        num_mapped_dims: usize,
        num_subspaces: usize,
        labels_buffer: &'a [u8],
        dims: &[usize],
    ) -> Self {
        let blocks = LabelBlockStream::new(num_subspaces, labels_buffer, num_mapped_dims);
        if dims.is_empty() {
            return StreamedView::Iteration { blocks };
        }
        assert!(
            dims.windows(2).all(|w| w[0] < w[1]) && dims[dims.len() - 1] < num_mapped_dims,
            "view dimensions {:?} invalid for {} mapped dimensions",
            dims,
            num_mapped_dims
        );
        StreamedView::Filter {
            blocks,
            view_dims: dims.iter().copied().collect(),
            to_match: SmallVec::new(),
        }
    }
}

impl<'a> View<'a> for StreamedView<'a> {
    fn lookup(&mut self, addr: &[&[u8]]) {
        match self {
            StreamedView::Iteration { blocks } => {
                debug_assert!(addr.is_empty());
                blocks.reset();
            }
            StreamedView::Filter {
                blocks,
                view_dims,
                to_match,
            } => {
                assert_eq!(addr.len(), view_dims.len(), "lookup arity mismatch");
                to_match.resize_with(addr.len(), Vec::new);
                for (slot, label) in to_match.iter_mut().zip(addr) {
                    slot.clear();
                    slot.extend_from_slice(label);
                }
                blocks.reset();
            }
        }
    }

    fn next_result(&mut self, addr_out: &mut [&'a [u8]]) -> Option<usize> {
        match self {
            StreamedView::Iteration { blocks } => {
                let block = blocks.next_block()?;
                addr_out[..block.address.len()].copy_from_slice(block.address);
                Some(block.subspace)
            }
            StreamedView::Filter {
                blocks,
                view_dims,
                to_match,
            } => {
                while let Some(block) = blocks.next_block() {
                    let mut matches = true;
                    let mut out_idx = 0;
                    let mut vdm_idx = 0;
                    for (dim, label) in block.address.iter().enumerate() {
                        if vdm_idx < view_dims.len() && view_dims[vdm_idx] == dim {
                            if *label != &to_match[vdm_idx][..] {
                                matches = false;
                                break;
                            }
                            vdm_idx += 1;
                        } else {
                            addr_out[out_idx] = *label;
                            out_idx += 1;
                        }
                    }
                    if matches {
                        return Some(block.subspace);
                    }
                }
                None
            }
        }
    }
}
