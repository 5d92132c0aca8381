//! Tensor value types
//!
//! A [`ValueType`] is a cell type plus a list of dimensions sorted by name.
//! Mapped dimensions (`x{}`) are addressed by labels, indexed dimensions
//! (`y[3]`) by integer coordinates. The spec syntax follows the usual
//! `tensor<float>(x{},y[3])` form; `double` and `tensor()` denote a scalar.

use crate::cell_type::CellType;
use crate::error::{Error, Result};
use std::fmt;

/// One tensor dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dimension {
    /// Dimension name
    pub name: String,
    /// `None` for mapped dimensions, the size for indexed ones
    pub size: Option<u32>,
}

impl Dimension {
    /// A mapped (sparse) dimension
    pub fn mapped(name: impl Into<String>) -> Self {
        Dimension {
            name: name.into(),
            size: None,
        }
    }

    /// An indexed (dense) dimension of the given size
    pub fn indexed(name: impl Into<String>, size: u32) -> Self {
        Dimension {
            name: name.into(),
            size: Some(size),
        }
    }

    /// True for mapped dimensions
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.size.is_none()
    }
}

/// Type of a tensor value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueType {
    cell_type: CellType,
    dimensions: Vec<Dimension>,
}

impl ValueType {
    /// Build a type; dimensions are sorted by name and must be unique
    pub fn new(cell_type: CellType, mut dimensions: Vec<Dimension>) -> Result<Self> {
        dimensions.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in dimensions.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(Error::InvalidType(format!(
                    "duplicate dimension '{}'",
                    pair[0].name
                )));
            }
        }
        if let Some(dim) = dimensions.iter().find(|d| d.size == Some(0)) {
            return Err(Error::InvalidType(format!(
                "indexed dimension '{}' has size 0",
                dim.name
            )));
        }
        dense_subspace_bytes(cell_type, &dimensions)?;
        Ok(ValueType {
            cell_type,
            dimensions,
        })
    }

    /// Scalar type (no dimensions)
    pub fn double() -> Self {
        ValueType {
            cell_type: CellType::Double,
            dimensions: Vec::new(),
        }
    }

    /// Parse a type spec such as `tensor<float>(x{},y[3])`
    pub fn from_spec(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec == "double" {
            return Ok(Self::double());
        }
        let rest = spec
            .strip_prefix("tensor")
            .ok_or_else(|| Error::InvalidType(format!("'{}' is not a tensor type", spec)))?;
        let (cell_type, rest) = match rest.strip_prefix('<') {
            Some(inner) => {
                let end = inner
                    .find('>')
                    .ok_or_else(|| Error::InvalidType(format!("unterminated cell type in '{}'", spec)))?;
                let cell_type = CellType::from_name(inner[..end].trim()).ok_or_else(|| {
                    Error::InvalidType(format!("unknown cell type '{}'", &inner[..end]))
                })?;
                (cell_type, &inner[end + 1..])
            }
            None => (CellType::Double, rest),
        };
        let body = rest
            .trim()
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(|| Error::InvalidType(format!("missing dimension list in '{}'", spec)))?;
        let mut dimensions = Vec::new();
        for part in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            dimensions.push(parse_dimension(part)?);
        }
        Self::new(cell_type, dimensions)
    }

    /// Canonical spec string
    pub fn to_spec(&self) -> String {
        self.to_string()
    }

    /// Cell type
    #[inline]
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// All dimensions, sorted by name
    #[inline]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Mapped dimensions in type order
    pub fn mapped_dimensions(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter().filter(|d| d.is_mapped())
    }

    /// Indexed dimensions in type order
    pub fn indexed_dimensions(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter().filter(|d| !d.is_mapped())
    }

    /// Number of mapped dimensions
    pub fn count_mapped_dimensions(&self) -> usize {
        self.mapped_dimensions().count()
    }

    /// Number of cells in one dense subspace
    pub fn dense_subspace_size(&self) -> usize {
        self.indexed_dimensions()
            .map(|d| d.size.unwrap_or(1) as usize)
            .product()
    }

    /// True if a value of type `other` may be stored in a column of this type
    pub fn is_assignable_from(&self, other: &ValueType) -> bool {
        self == other
    }
}

/// Byte size of one dense subspace; it must fit a u32 block length
fn dense_subspace_bytes(cell_type: CellType, dimensions: &[Dimension]) -> Result<u32> {
    dimensions
        .iter()
        .filter_map(|d| d.size)
        .try_fold(cell_type.cell_size() as u32, |acc, size| acc.checked_mul(size))
        .ok_or_else(|| {
            Error::InvalidType(format!(
                "dense subspace of {} dimensions {:?} is too large",
                cell_type.name(),
                dimensions
                    .iter()
                    .filter_map(|d| d.size.map(|s| format!("{}[{}]", d.name, s)))
                    .collect::<Vec<_>>()
            ))
        })
}

fn parse_dimension(part: &str) -> Result<Dimension> {
    if let Some(name) = part.strip_suffix("{}") {
        return checked_name(name).map(Dimension::mapped);
    }
    let open = part
        .find('[')
        .ok_or_else(|| Error::InvalidType(format!("bad dimension '{}'", part)))?;
    let size_str = part[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| Error::InvalidType(format!("bad dimension '{}'", part)))?;
    let size = size_str
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::InvalidType(format!("bad dimension size in '{}'", part)))?;
    checked_name(&part[..open]).map(|name| Dimension::indexed(name, size))
}

fn checked_name(name: &str) -> Result<String> {
    let name = name.trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name.to_string())
    } else {
        Err(Error::InvalidType(format!("bad dimension name '{}'", name)))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dimensions.is_empty() {
            return f.write_str("double");
        }
        f.write_str("tensor")?;
        if self.cell_type != CellType::Double {
            write!(f, "<{}>", self.cell_type)?;
        }
        f.write_str("(")?;
        for (i, dim) in self.dimensions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match dim.size {
                None => write!(f, "{}{{}}", dim.name)?,
                Some(size) => write!(f, "{}[{}]", dim.name, size)?,
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed() {
        let t = ValueType::from_spec("tensor<float>(y[3],x{})").unwrap();
        assert_eq!(t.cell_type(), CellType::Float);
        assert_eq!(t.dimensions()[0], Dimension::mapped("x"));
        assert_eq!(t.dimensions()[1], Dimension::indexed("y", 3));
        assert_eq!(t.count_mapped_dimensions(), 1);
        assert_eq!(t.dense_subspace_size(), 3);
        assert_eq!(t.to_spec(), "tensor<float>(x{},y[3])");
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(ValueType::from_spec("double").unwrap(), ValueType::double());
        assert_eq!(ValueType::from_spec("tensor()").unwrap(), ValueType::double());
        assert_eq!(ValueType::double().dense_subspace_size(), 1);
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "tensor(x{}",
            "tensor<int8>(x{})",
            "tensor(x[0])",
            "tensor(x{},x{})",
            "matrix(x{})",
            "tensor(x[a])",
            "tensor(-{})",
            "tensor(x[65536],y[65536])",
            "tensor<float>(x[1073741824])",
        ] {
            assert!(
                matches!(ValueType::from_spec(bad), Err(Error::InvalidType(_))),
                "{} should not parse",
                bad
            );
        }
    }

    #[test]
    fn test_dense_subspace_size_limit() {
        let t = ValueType::from_spec("tensor<float>(x[65536],y[16383])").unwrap();
        assert_eq!(t.dense_subspace_size(), 65536 * 16383);
        let err = ValueType::new(
            CellType::Double,
            vec![Dimension::indexed("x", u32::MAX), Dimension::indexed("y", 2)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidType(_)));
    }

    #[test]
    fn test_assignable() {
        let field = ValueType::from_spec("tensor(x{},y[2])").unwrap();
        assert!(field.is_assignable_from(&ValueType::from_spec("tensor(y[2],x{})").unwrap()));
        assert!(!field.is_assignable_from(&ValueType::from_spec("tensor(x{},y[3])").unwrap()));
        assert!(!field.is_assignable_from(&ValueType::from_spec("tensor(x{})").unwrap()));
        assert!(!field.is_assignable_from(&ValueType::from_spec("tensor<float>(x{},y[2])").unwrap()));
    }
}
