//! Label stream reading and writing
//!
//! Labels are stored back to back, each prefixed with its length in the
//! "int1_4" form:
//!
//! ```text
//! len < 0x80   : [len]                          1 byte
//! len >= 0x80  : [0x80 | len >> 24, .., len]    4 bytes, big-endian, top bit set
//! ```
//!
//! A [`LabelBlockStream`] groups the flat label sequence into one address per
//! subspace. It is a forward-only cursor; restarting means `reset()`.

use byteorder::{BigEndian, ByteOrder};
use smallvec::SmallVec;
use tensorcol_core::{invariant_violation, Error, Result};

/// Largest label length the prefix can express
pub const MAX_LABEL_LEN: usize = 0x7fff_ffff;

/// Append `len` in int1_4 form
pub fn write_int1_4(out: &mut Vec<u8>, len: usize) -> Result<()> {
    if len < 0x80 {
        out.push(len as u8);
        Ok(())
    } else if len <= MAX_LABEL_LEN {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, len as u32 | 0x8000_0000);
        out.extend_from_slice(&buf);
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "label length {} exceeds {}",
            len, MAX_LABEL_LEN
        )))
    }
}

/// Read an int1_4 value at `*pos`, advancing `*pos`
pub fn read_int1_4(buf: &[u8], pos: &mut usize) -> Result<usize> {
    let first = *buf
        .get(*pos)
        .ok_or_else(|| Error::corrupt(format!("length prefix missing at offset {}", *pos)))?;
    if first & 0x80 == 0 {
        *pos += 1;
        return Ok(first as usize);
    }
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| Error::corrupt(format!("truncated 4-byte length at offset {}", *pos)))?;
    *pos += 4;
    Ok((BigEndian::read_u32(bytes) & 0x7fff_ffff) as usize)
}

/// Append one length-prefixed label
pub fn write_label(out: &mut Vec<u8>, label: &[u8]) -> Result<()> {
    write_int1_4(out, label.len())?;
    out.extend_from_slice(label);
    Ok(())
}

/// Sequential reader over a label buffer
#[derive(Debug, Clone)]
pub struct LabelStream<'a> {
    source: &'a [u8],
    pos: usize,
}

impl<'a> LabelStream<'a> {
    /// Start reading at the beginning of `source`
    pub fn new(source: &'a [u8]) -> Self {
        LabelStream { source, pos: 0 }
    }

    /// Read the next label
    pub fn next_label(&mut self) -> Result<&'a [u8]> {
        let len = read_int1_4(self.source, &mut self.pos)?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.source.len())
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "label of length {} at offset {} overruns buffer of {} bytes",
                    len,
                    self.pos,
                    self.source.len()
                ))
            })?;
        let label = &self.source[self.pos..end];
        self.pos = end;
        Ok(label)
    }

    /// Rewind to the start
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Validate that `source` holds exactly `count` labels.
pub fn validate_labels(source: &[u8], count: usize) -> Result<()> {
    let mut stream = LabelStream::new(source);
    for _ in 0..count {
        stream.next_label()?;
    }
    if stream.position() != source.len() {
        return Err(Error::corrupt(format!(
            "{} trailing bytes after {} labels",
            source.len() - stream.position(),
            count
        )));
    }
    Ok(())
}

/// One decoded row of the label stream
#[derive(Debug, Clone, Copy)]
pub struct LabelBlock<'b, 'a> {
    /// Subspace index of this row
    pub subspace: usize,
    /// One label per mapped dimension
    pub address: &'b [&'a [u8]],
}

/// Cursor producing one [`LabelBlock`] per subspace
#[derive(Debug, Clone)]
pub struct LabelBlockStream<'a> {
    num_subspaces: usize,
    labels: LabelStream<'a>,
    subspace_index: usize,
    current_address: SmallVec<[&'a [u8]; 4]>,
}

impl<'a> LabelBlockStream<'a> {
    /// Create a stream over an already validated label buffer.
    ///
    /// The stream starts exhausted; call [`reset`](Self::reset) to begin.
    pub fn new(num_subspaces: usize, label_buf: &'a [u8], num_mapped_dims: usize) -> Self {
        let empty: &'a [u8] = &[];
        LabelBlockStream {
            num_subspaces,
            labels: LabelStream::new(label_buf),
            subspace_index: num_subspaces,
            current_address: SmallVec::from_elem(empty, num_mapped_dims),
        }
    }

    /// Rewind to the first subspace
    pub fn reset(&mut self) {
        self.subspace_index = 0;
        self.labels.reset();
    }

    /// Decode the next row, or `None` when every subspace has been seen
    pub fn next_block(&mut self) -> Option<LabelBlock<'_, 'a>> {
        if self.subspace_index >= self.num_subspaces {
            return None;
        }
        for label in self.current_address.iter_mut() {
            *label = match self.labels.next_label() {
                Ok(label) => label,
                Err(e) => invariant_violation(format!(
                    "label stream broken at subspace {}: {}",
                    self.subspace_index, e
                )),
            };
        }
        let subspace = self.subspace_index;
        self.subspace_index += 1;
        Some(LabelBlock {
            subspace,
            address: &self.current_address[..],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int1_4_short_and_long() {
        let mut out = Vec::new();
        write_int1_4(&mut out, 5).unwrap();
        write_int1_4(&mut out, 0x7f).unwrap();
        write_int1_4(&mut out, 0x80).unwrap();
        write_int1_4(&mut out, 70_000).unwrap();
        assert_eq!(&out[..2], &[5, 0x7f]);
        assert_eq!(&out[2..6], &[0x80, 0x00, 0x00, 0x80]);
        let mut pos = 0;
        assert_eq!(read_int1_4(&out, &mut pos).unwrap(), 5);
        assert_eq!(read_int1_4(&out, &mut pos).unwrap(), 0x7f);
        assert_eq!(read_int1_4(&out, &mut pos).unwrap(), 0x80);
        assert_eq!(read_int1_4(&out, &mut pos).unwrap(), 70_000);
        assert_eq!(pos, out.len());
    }

    #[test]
    fn test_int1_4_too_long() {
        let mut out = Vec::new();
        assert!(matches!(
            write_int1_4(&mut out, MAX_LABEL_LEN + 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_truncated_prefix() {
        let mut pos = 0;
        assert!(read_int1_4(&[0x80, 0x00], &mut pos).unwrap_err().is_corruption());
        let mut pos = 0;
        assert!(read_int1_4(&[], &mut pos).is_err());
    }

    #[test]
    fn test_label_overrun() {
        let mut stream = LabelStream::new(&[3, b'a', b'b']);
        assert!(stream.next_label().unwrap_err().is_corruption());
    }

    #[test]
    fn test_validate_labels() {
        let mut buf = Vec::new();
        write_label(&mut buf, b"foo").unwrap();
        write_label(&mut buf, b"").unwrap();
        assert!(validate_labels(&buf, 2).is_ok());
        assert!(validate_labels(&buf, 1).is_err());
        assert!(validate_labels(&buf, 3).is_err());
    }

    #[test]
    fn test_block_stream() {
        let mut buf = Vec::new();
        for label in [&b"a"[..], b"1", b"b", b"2"] {
            write_label(&mut buf, label).unwrap();
        }
        let mut blocks = LabelBlockStream::new(2, &buf, 2);
        assert!(blocks.next_block().is_none(), "starts exhausted");
        blocks.reset();
        let first = blocks.next_block().unwrap();
        assert_eq!(first.subspace, 0);
        assert_eq!(first.address, &[&b"a"[..], &b"1"[..]]);
        let second = blocks.next_block().unwrap();
        assert_eq!(second.subspace, 1);
        assert_eq!(second.address, &[&b"b"[..], &b"2"[..]]);
        assert!(blocks.next_block().is_none());
        blocks.reset();
        assert_eq!(blocks.next_block().unwrap().subspace, 0);
    }

    #[test]
    fn test_block_stream_no_mapped_dims() {
        let mut blocks = LabelBlockStream::new(1, &[], 0);
        blocks.reset();
        let block = blocks.next_block().unwrap();
        assert_eq!(block.subspace, 0);
        assert!(block.address.is_empty());
        assert!(blocks.next_block().is_none());
    }
}
