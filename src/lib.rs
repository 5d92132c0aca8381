//! tensorcol - generation-reclaimed tensor attribute column
//!
//! A column stores zero or one tensor per document id. One writer sets,
//! clears and compacts values while any number of readers resolve documents
//! without locking.
//!
//! # Quick Start
//!
//! ```
//! use tensorcol::{AttributeConfig, TensorAttribute, TensorSpec, ValueType};
//!
//! let mut attr = TensorAttribute::new("embedding", AttributeConfig::new("tensor(x{})")).unwrap();
//! let doc = attr.add_doc();
//! let value = TensorSpec::new(ValueType::from_spec("tensor(x{})").unwrap())
//!     .add([("x", "a")], 1.0)
//!     .to_value()
//!     .unwrap();
//! attr.set_tensor(doc, &value).unwrap();
//! attr.commit();
//!
//! let reader = attr.reader();
//! assert!(reader.get_tensor(doc).is_some());
//! ```
//!
//! # Architecture
//!
//! - `tensorcol-core`: value/type interface, errors, memory accounting
//! - `tensorcol-streamed`: the streamed block codec and its index
//! - `tensorcol-storage`: generations, the data store and the handle table
//! - `tensorcol-attribute`: the column controller, persistence and config

pub use tensorcol_attribute::{
    AttributeConfig, AttributeReader, AttributeStatus, CompactionStrategy, TensorAttribute,
    TensorAttributeSaver,
};
pub use tensorcol_core::{
    CellType, DocId, Error, FastValue, Index, Label, MemoryUsage, Result, TensorSpec, Value,
    ValueType, View,
};
pub use tensorcol_storage::{GenerationGuard, GrowStrategy, StoreConfig, TensorData};
pub use tensorcol_streamed::{decode, encode, IndexMode, StreamedValue};
