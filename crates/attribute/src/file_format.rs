//! Persisted column format
//!
//! ```text
//! [version: u32 LE]            always 0
//! [doc_id_limit: u32 LE]
//! [create_serial_num: u64 LE]
//! For each doc id below doc_id_limit:
//!   [size: u32 LE]             0 = no value
//!   [size bytes]               wire form of the encoded block
//! ```
//!
//! A stream without any header bytes holds no data.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use tensorcol_core::{Error, Result};

/// Version tag written and accepted by this build
pub const TENSOR_ATTRIBUTE_VERSION: u32 = 0;

/// Size of the fixed header
pub const HEADER_SIZE: usize = 16;

/// Fixed header of a persisted column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version
    pub version: u32,
    /// Number of doc ids that follow
    pub doc_id_limit: u32,
    /// Serial number the column was created at
    pub create_serial_num: u64,
}

impl FileHeader {
    /// Header of the current version
    pub fn new(doc_id_limit: u32, create_serial_num: u64) -> Self {
        FileHeader {
            version: TENSOR_ATTRIBUTE_VERSION,
            doc_id_limit,
            create_serial_num,
        }
    }

    /// Write the header
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.doc_id_limit)?;
        writer.write_u64::<LittleEndian>(self.create_serial_num)?;
        Ok(())
    }

    /// Read a header. `Ok(None)` if the stream is empty.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < HEADER_SIZE {
            return Err(Error::corrupt(format!(
                "truncated header: {} of {} bytes",
                filled, HEADER_SIZE
            )));
        }
        let mut cursor = &buf[..];
        Ok(Some(FileHeader {
            version: cursor.read_u32::<LittleEndian>()?,
            doc_id_limit: cursor.read_u32::<LittleEndian>()?,
            create_serial_num: cursor.read_u64::<LittleEndian>()?,
        }))
    }
}

/// Write one document's block, or the absent marker for `None`
pub fn write_blob<W: Write>(writer: &mut W, blob: Option<&[u8]>) -> Result<()> {
    let blob = blob.unwrap_or(&[]);
    let size = u32::try_from(blob.len())
        .map_err(|_| Error::InvalidArgument(format!("blob of {} bytes too large", blob.len())))?;
    writer.write_u32::<LittleEndian>(size)?;
    writer.write_all(blob)?;
    Ok(())
}

/// Read one document's block into `buf`. Returns false for the absent marker.
pub fn read_blob<R: Read>(reader: &mut R, doc: u32, buf: &mut Vec<u8>) -> Result<bool> {
    let size = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| truncated(e, doc))?;
    buf.clear();
    if size == 0 {
        return Ok(false);
    }
    let read = reader
        .by_ref()
        .take(u64::from(size))
        .read_to_end(buf)
        .map_err(|e| truncated(e, doc))?;
    if read != size as usize {
        return Err(Error::corrupt(format!(
            "blob of doc {} declares {} bytes, stream holds {}",
            doc, size, read
        )));
    }
    Ok(true)
}

fn truncated(e: io::Error, doc: u32) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::corrupt(format!("stream ends inside the blob of doc {}", doc))
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut out = Vec::new();
        FileHeader::new(2, 0x0102).write_to(&mut out).unwrap();
        assert_eq!(
            out,
            vec![0, 0, 0, 0, 2, 0, 0, 0, 0x02, 0x01, 0, 0, 0, 0, 0, 0]
        );
        let header = FileHeader::read_from(&mut &out[..]).unwrap().unwrap();
        assert_eq!(header, FileHeader::new(2, 0x0102));
    }

    #[test]
    fn test_empty_stream_has_no_header() {
        let mut empty: &[u8] = &[];
        assert_eq!(FileHeader::read_from(&mut empty).unwrap(), None);
    }

    #[test]
    fn test_truncated_header() {
        let mut short: &[u8] = &[0, 0, 0, 0, 1];
        assert!(FileHeader::read_from(&mut short).unwrap_err().is_corruption());
    }

    #[test]
    fn test_blobs() {
        let mut out = Vec::new();
        write_blob(&mut out, None).unwrap();
        write_blob(&mut out, Some(&[9, 8, 7])).unwrap();
        assert_eq!(out, vec![0, 0, 0, 0, 3, 0, 0, 0, 9, 8, 7]);

        let mut input = &out[..];
        let mut buf = Vec::new();
        assert!(!read_blob(&mut input, 0, &mut buf).unwrap());
        assert!(read_blob(&mut input, 1, &mut buf).unwrap());
        assert_eq!(buf, vec![9, 8, 7]);
        assert!(read_blob(&mut input, 2, &mut buf).unwrap_err().is_corruption());
    }

    #[test]
    fn test_truncated_blob() {
        let mut input: &[u8] = &[4, 0, 0, 0, 1, 2];
        let mut buf = Vec::new();
        let err = read_blob(&mut input, 5, &mut buf).unwrap_err();
        assert!(err.to_string().contains("doc 5"));
    }

    #[test]
    fn test_oversized_blob_length() {
        let mut input: &[u8] = &[0xff, 0xff, 0xff, 0xff, 1, 2, 3];
        let mut buf = Vec::new();
        let err = read_blob(&mut input, 0, &mut buf).unwrap_err();
        assert!(err.is_corruption());
        assert!(buf.capacity() < 1 << 20);
    }
}
