//! Generation-reclaimed storage for tensorcol
//!
//! This crate implements the memory layer of a tensor column:
//! - EntryRef: 32-bit `(buffer_id, offset)` handles
//! - GenerationHandler / GenerationGuard: reader pinning of generations
//! - GenerationHolder: pending and generation-stamped hold lists
//! - DataBuffer / TensorData: write-once slot buffers and reader byte handles
//! - TensorStore / StoreReader: buffer table with hold, trim and compaction
//! - RefVector / RefVectorReader: the doc id to handle table
//!
//! # Concurrency
//!
//! Every structure has a writer half, owned by one thread and mutated
//! through `&mut self`, and a cloneable reader half that never blocks.
//! Memory retired by the writer is released only after every reader that
//! could have seen it has dropped its guard.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data_buffer;
pub mod entry_ref;
pub mod generation;
pub mod generation_holder;
pub mod rcu_vector;
pub mod tensor_store;

pub use data_buffer::{DataBuffer, TensorData};
pub use entry_ref::{EntryRef, MAX_BUFFERS, MAX_BUFFER_ENTRIES};
pub use generation::{Generation, GenerationGuard, GenerationHandler};
pub use generation_holder::GenerationHolder;
pub use rcu_vector::{GrowStrategy, RefVector, RefVectorReader};
pub use tensor_store::{BufferStatus, StoreConfig, StoreReader, TensorStore};
