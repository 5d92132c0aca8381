//! Core types and traits for tensorcol
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error type hierarchy and the invariant-violation hook
//! - CellType / TypedCells: cell representation and borrowed cell access
//! - ValueType: tensor types (`tensor<float>(x{},y[3])`)
//! - Value / Index / View: the abstract tensor value interface
//! - FastValue: owned value with a hash-map address index
//! - TensorSpec: ordered address-to-cell form used to build and compare values
//! - MemoryUsage: memory accounting shared by every layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell_type;
pub mod error;
pub mod fast_value;
pub mod memory_usage;
pub mod tensor_spec;
pub mod value;
pub mod value_type;

pub use cell_type::{CellType, TypedCells};
pub use error::{invariant_violation, Error, Result};
pub use fast_value::{FastValue, FastValueBuilder, FastValueIndex};
pub use memory_usage::MemoryUsage;
pub use tensor_spec::{Address, Label, TensorSpec};
pub use value::{for_each_subspace, Index, Value, View};
pub use value_type::{Dimension, ValueType};

/// Document identifier within a column
pub type DocId = u32;
