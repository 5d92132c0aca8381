//! Address-to-cell description of a tensor
//!
//! [`TensorSpec`] is the neutral, ordered form of a tensor: every cell keyed by
//! its full address. It is used to build values and to compare values that
//! come from different representations.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::fast_value::{FastValue, FastValueBuilder};
use crate::value::{for_each_subspace, Value};
use crate::value_type::ValueType;

/// One coordinate of a cell address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Label {
    /// Label of a mapped dimension
    Mapped(String),
    /// Coordinate of an indexed dimension
    Indexed(u32),
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label::Mapped(s.to_string())
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Label::Mapped(s)
    }
}

impl From<u32> for Label {
    fn from(i: u32) -> Self {
        Label::Indexed(i)
    }
}

/// Full cell address, keyed by dimension name
pub type Address = BTreeMap<String, Label>;

/// Ordered map from cell address to cell value
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    value_type: ValueType,
    cells: BTreeMap<Address, f64>,
}

impl TensorSpec {
    /// Empty spec of the given type
    pub fn new(value_type: ValueType) -> Self {
        TensorSpec {
            value_type,
            cells: BTreeMap::new(),
        }
    }

    /// Add (or overwrite) a cell
    pub fn add<I, K, L>(mut self, address: I, value: f64) -> Self
    where
        I: IntoIterator<Item = (K, L)>,
        K: Into<String>,
        L: Into<Label>,
    {
        let address = address
            .into_iter()
            .map(|(k, l)| (k.into(), l.into()))
            .collect();
        self.cells.insert(address, value);
        self
    }

    /// Type of the spec
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// All cells in address order
    pub fn cells(&self) -> &BTreeMap<Address, f64> {
        &self.cells
    }

    /// Extract the spec of any value. Every cell of every subspace is
    /// included, zeros too.
    pub fn from_value(value: &dyn Value) -> Self {
        let value_type = value.value_type().clone();
        let mapped: Vec<&str> = value_type.mapped_dimensions().map(|d| d.name.as_str()).collect();
        let indexed: Vec<(&str, u32)> = value_type
            .indexed_dimensions()
            .map(|d| (d.name.as_str(), d.size.unwrap_or(1)))
            .collect();
        let dsss = value_type.dense_subspace_size();
        let cells = value.cells();
        let mut out = BTreeMap::new();
        for_each_subspace(value, |subspace, labels| {
            for offset in 0..dsss {
                let mut address = Address::new();
                for (name, label) in mapped.iter().zip(labels) {
                    address.insert(
                        name.to_string(),
                        Label::Mapped(String::from_utf8_lossy(label).into_owned()),
                    );
                }
                let mut rem = offset;
                for (name, size) in indexed.iter().rev() {
                    address.insert(name.to_string(), Label::Indexed((rem % *size as usize) as u32));
                    rem /= *size as usize;
                }
                out.insert(address, cells.get(subspace * dsss + offset));
            }
        });
        TensorSpec {
            value_type,
            cells: out,
        }
    }

    /// Build a [`FastValue`] holding these cells.
    ///
    /// Subspaces appear in address order; cells not mentioned are zero.
    pub fn to_value(&self) -> Result<FastValue> {
        let value_type = &self.value_type;
        let dims = value_type.dimensions();
        let cell_type = value_type.cell_type();
        let mut builder = FastValueBuilder::new(value_type.clone(), self.cells.len());
        let mut mapped: Vec<&[u8]> = Vec::with_capacity(value_type.count_mapped_dimensions());
        for (address, value) in &self.cells {
            if address.len() != dims.len() {
                return Err(Error::InvalidArgument(format!(
                    "address {:?} does not match type {}",
                    address, value_type
                )));
            }
            mapped.clear();
            let mut dense_offset = 0usize;
            for dim in dims {
                match (address.get(&dim.name), dim.size) {
                    (Some(Label::Mapped(label)), None) => mapped.push(label.as_bytes()),
                    (Some(Label::Indexed(i)), Some(size)) if *i < size => {
                        dense_offset = dense_offset * size as usize + *i as usize;
                    }
                    _ => {
                        return Err(Error::InvalidArgument(format!(
                            "bad label for dimension '{}' in {:?}",
                            dim.name, address
                        )))
                    }
                }
            }
            let cells = builder.subspace_mut(&mapped);
            cell_type.write_cell(cells, dense_offset, *value);
        }
        Ok(builder.build())
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{{", self.value_type)?;
        for (i, (address, value)) in self.cells.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str("{")?;
            for (j, (dim, label)) in address.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                match label {
                    Label::Mapped(s) => write!(f, "{}:{}", dim, s)?,
                    Label::Indexed(n) => write!(f, "{}:{}", dim, n)?,
                }
            }
            write!(f, "}}:{}", value)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_roundtrip() {
        let t = ValueType::from_spec("tensor(x{})").unwrap();
        let spec = TensorSpec::new(t)
            .add([("x", "a")], 1.0)
            .add([("x", "b")], 2.0);
        let value = spec.to_value().unwrap();
        assert_eq!(value.index().size(), 2);
        assert_eq!(TensorSpec::from_value(&value), spec);
    }

    #[test]
    fn test_mixed_roundtrip() {
        let t = ValueType::from_spec("tensor<float>(x{},y[2])").unwrap();
        let spec = TensorSpec::new(t)
            .add([("x", Label::from("a")), ("y", Label::from(0))], 1.0)
            .add([("x", Label::from("a")), ("y", Label::from(1))], 2.0)
            .add([("x", Label::from("b")), ("y", Label::from(0))], 3.0)
            .add([("x", Label::from("b")), ("y", Label::from(1))], 4.0);
        let value = spec.to_value().unwrap();
        assert_eq!(value.index().size(), 2);
        assert_eq!(value.cells().len(), 4);
        assert_eq!(TensorSpec::from_value(&value), spec);
    }

    #[test]
    fn test_dense_row_major() {
        let t = ValueType::from_spec("tensor(x[2],y[3])").unwrap();
        let spec = TensorSpec::new(t).add([("x", 1u32), ("y", 2u32)], 5.0);
        let value = spec.to_value().unwrap();
        assert_eq!(value.cells().get(5), 5.0);
    }

    #[test]
    fn test_bad_address_rejected() {
        let t = ValueType::from_spec("tensor(x[2])").unwrap();
        let spec = TensorSpec::new(t).add([("x", 2u32)], 5.0);
        assert!(matches!(spec.to_value(), Err(Error::InvalidArgument(_))));

        let t = ValueType::from_spec("tensor(x{})").unwrap();
        let spec = TensorSpec::new(t).add([("y", "a")], 5.0);
        assert!(spec.to_value().is_err());
    }

    #[test]
    fn test_display() {
        let t = ValueType::from_spec("tensor(x{})").unwrap();
        let spec = TensorSpec::new(t).add([("x", "a")], 1.5);
        assert_eq!(spec.to_string(), "tensor(x{}):{{x:a}:1.5}");
    }
}
