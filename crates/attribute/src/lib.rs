//! Tensor attribute column for tensorcol
//!
//! This crate ties the codec and the store together into a per-document
//! column:
//! - TensorAttribute: the single writer (doc ids, set/clear, commit,
//!   compaction, lid space)
//! - AttributeReader: lock-free, cloneable read handle
//! - TensorAttributeSaver: guarded snapshot streamed to a writer or file
//! - AttributeConfig: TOML configuration of type, index and memory policy
//!
//! # Example
//!
//! ```
//! use tensorcol_attribute::{AttributeConfig, TensorAttribute};
//! use tensorcol_core::{TensorSpec, ValueType};
//!
//! let mut attr = TensorAttribute::new("embedding", AttributeConfig::new("tensor(x{})")).unwrap();
//! let doc = attr.add_doc();
//! let value = TensorSpec::new(ValueType::from_spec("tensor(x{})").unwrap())
//!     .add([("x", "a")], 1.0)
//!     .to_value()
//!     .unwrap();
//! attr.set_tensor(doc, &value).unwrap();
//! attr.commit();
//! assert!(attr.reader().get_tensor(doc).is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod config;
pub mod file_format;
pub mod reader;
pub mod saver;

pub use attribute::{AttributeStatus, TensorAttribute};
pub use config::{AttributeConfig, CompactionStrategy};
pub use file_format::{FileHeader, TENSOR_ATTRIBUTE_VERSION};
pub use reader::AttributeReader;
pub use saver::TensorAttributeSaver;
