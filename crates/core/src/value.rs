//! Abstract tensor value interface
//!
//! A tensor value is a set of subspaces. Each subspace is identified by one
//! label per mapped dimension and holds a dense block of
//! `dense_subspace_size` cells. Cells of all subspaces are laid out
//! contiguously in subspace order, so subspace `i` owns cells
//! `[i * dsss, (i + 1) * dsss)`.
//!
//! The [`Index`] maps addresses to subspace indexes. Queries go through a
//! [`View`] that is bound to a subset of the mapped dimensions:
//!
//! ```ignore
//! let mut view = value.index().create_view(&[0]);
//! view.lookup(&[b"a"]);
//! let mut rest = [&b""[..]; 1];
//! while let Some(subspace) = view.next_result(&mut rest) {
//!     // `rest` holds the labels of the dimensions not in the view
//! }
//! ```
//!
//! Labels are uninterpreted byte spans.

use crate::cell_type::TypedCells;
use crate::memory_usage::MemoryUsage;
use crate::value_type::ValueType;

/// A query cursor over an [`Index`]
///
/// A view supports one outstanding scan per `lookup` call; each
/// `next_result` resumes where the previous one stopped.
pub trait View<'a> {
    /// Start a new scan matching `addr`, one label per view dimension
    fn lookup(&mut self, addr: &[&[u8]]);

    /// Advance to the next matching subspace.
    ///
    /// Writes the labels of the dimensions *not* in the view into `addr_out`
    /// (in their original relative order) and returns the subspace index,
    /// or `None` once the scan is exhausted.
    fn next_result(&mut self, addr_out: &mut [&'a [u8]]) -> Option<usize>;
}

/// Address-to-subspace mapping of a value
pub trait Index {
    /// Number of subspaces
    fn size(&self) -> usize;

    /// Create a view over the given mapped-dimension positions.
    ///
    /// `dims` must be strictly increasing. An empty `dims` gives a view that
    /// iterates all subspaces.
    fn create_view<'a>(&'a self, dims: &[usize]) -> Box<dyn View<'a> + 'a>;
}

/// A tensor value
pub trait Value {
    /// Type of the value
    fn value_type(&self) -> &ValueType;

    /// Cells of all subspaces
    fn cells(&self) -> TypedCells<'_>;

    /// Address index
    fn index(&self) -> &dyn Index;

    /// Memory held by this value
    fn memory_usage(&self) -> MemoryUsage;
}

/// Visit every subspace of `value` in index order.
///
/// The callback receives the subspace index and its full mapped address.
pub fn for_each_subspace<F>(value: &dyn Value, mut f: F)
where
    F: FnMut(usize, &[&[u8]]),
{
    let num_mapped = value.value_type().count_mapped_dimensions();
    let index = value.index();
    let mut view = index.create_view(&[]);
    let empty: &[u8] = &[];
    let mut address: Vec<&[u8]> = vec![empty; num_mapped];
    view.lookup(&[]);
    while let Some(subspace) = view.next_result(&mut address) {
        f(subspace, &address);
    }
}
