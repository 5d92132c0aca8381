//! Streamed tensor encoding for tensorcol
//!
//! This crate packs a tensor value into one contiguous block and reads it
//! back without copying:
//! - label_stream: int1_4 length-prefixed labels and the per-subspace cursor
//! - encoding: block layout, encode, wire validation
//! - index: address index that scans the label stream in place
//! - value: `StreamedValue`, a `Value` backed by block bytes
//!
//! # Read Path
//!
//! ```text
//! stored bytes -> BlockLayout::frame (header only) -> StreamedValue
//!                                                       |- cells: zero-copy
//!                                                       `- index: Streamed | Fast
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod index;
pub mod label_stream;
pub mod value;

pub use encoding::{encode, encode_value, BlockLayout, DataFromType, StreamedValueData, BLOCK_HEADER_SIZE};
pub use index::StreamedValueIndex;
pub use label_stream::{LabelBlock, LabelBlockStream, LabelStream};
pub use value::{decode, decode_checked, decode_to_fast_value, IndexMode, StreamedValue};
