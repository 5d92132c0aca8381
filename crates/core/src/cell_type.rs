//! Cell types and typed cell access
//!
//! Cells are always kept as little-endian IEEE bytes. [`TypedCells`] is a
//! borrowed view over such bytes; it never requires alignment, so it can
//! point straight into a stored block.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric representation of tensor cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    /// 64-bit IEEE float
    #[default]
    Double,
    /// 32-bit IEEE float
    Float,
}

impl CellType {
    /// Size of one cell in bytes
    #[inline]
    pub const fn cell_size(self) -> usize {
        match self {
            CellType::Double => 8,
            CellType::Float => 4,
        }
    }

    /// Size in bytes of `num_cells` cells
    #[inline]
    pub const fn mem_size(self, num_cells: usize) -> usize {
        self.cell_size() * num_cells
    }

    /// Name used in type specs (`tensor<float>(...)`)
    pub fn name(self) -> &'static str {
        match self {
            CellType::Double => "double",
            CellType::Float => "float",
        }
    }

    /// Parse a cell type name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "double" => Some(CellType::Double),
            "float" => Some(CellType::Float),
            _ => None,
        }
    }

    /// Append one cell value to `out`
    #[inline]
    pub fn push_cell(self, out: &mut Vec<u8>, value: f64) {
        match self {
            CellType::Double => {
                let mut buf = [0u8; 8];
                LittleEndian::write_f64(&mut buf, value);
                out.extend_from_slice(&buf);
            }
            CellType::Float => {
                let mut buf = [0u8; 4];
                LittleEndian::write_f32(&mut buf, value as f32);
                out.extend_from_slice(&buf);
            }
        }
    }

    /// Overwrite cell `idx` in `cells`
    #[inline]
    pub fn write_cell(self, cells: &mut [u8], idx: usize, value: f64) {
        let at = idx * self.cell_size();
        match self {
            CellType::Double => LittleEndian::write_f64(&mut cells[at..at + 8], value),
            CellType::Float => LittleEndian::write_f32(&mut cells[at..at + 4], value as f32),
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Borrowed, typed view over contiguous cell bytes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypedCells<'a> {
    cell_type: CellType,
    bytes: &'a [u8],
}

impl<'a> TypedCells<'a> {
    /// Wrap cell bytes. `bytes.len()` must be a multiple of the cell size.
    pub fn new(cell_type: CellType, bytes: &'a [u8]) -> Self {
        debug_assert_eq!(bytes.len() % cell_type.cell_size(), 0);
        TypedCells { cell_type, bytes }
    }

    /// Cell type
    #[inline]
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// Raw little-endian bytes
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Number of cells
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.cell_type.cell_size()
    }

    /// True when there are no cells
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Cell `idx` widened to `f64`
    #[inline]
    pub fn get(&self, idx: usize) -> f64 {
        let size = self.cell_type.cell_size();
        let at = idx * size;
        match self.cell_type {
            CellType::Double => LittleEndian::read_f64(&self.bytes[at..at + size]),
            CellType::Float => LittleEndian::read_f32(&self.bytes[at..at + size]) as f64,
        }
    }

    /// The `num_cells` cells starting at cell `first`
    pub fn slice(&self, first: usize, num_cells: usize) -> TypedCells<'a> {
        let size = self.cell_type.cell_size();
        TypedCells {
            cell_type: self.cell_type,
            bytes: &self.bytes[first * size..(first + num_cells) * size],
        }
    }

    /// Iterate all cells as `f64`
    pub fn iter(&self) -> impl Iterator<Item = f64> + 'a {
        let this = *self;
        (0..this.len()).map(move |i| this.get(i))
    }
}
