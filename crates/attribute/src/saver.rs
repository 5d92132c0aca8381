//! Save and load of a tensor attribute
//!
//! A save snapshots the committed handles under a generation guard, so the
//! returned [`TensorAttributeSaver`] can stream the blocks from another
//! thread while the writer keeps mutating the column. A load rebuilds the
//! table and store from scratch and installs them only once the whole
//! stream has been read.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{error, info};

use tensorcol_core::{DocId, Error, Result};
use tensorcol_storage::{EntryRef, GenerationGuard, RefVector, StoreReader, TensorStore};

use crate::attribute::TensorAttribute;
use crate::file_format::{read_blob, write_blob, FileHeader, TENSOR_ATTRIBUTE_VERSION};

/// Snapshot of a column being saved
///
/// Holds a generation guard, so every block it refers to stays readable
/// until the saver is dropped.
pub struct TensorAttributeSaver {
    _guard: GenerationGuard,
    name: String,
    refs: Vec<EntryRef>,
    store: StoreReader,
    create_serial_num: u64,
}

impl TensorAttributeSaver {
    /// Number of documents that will be written
    pub fn doc_id_limit(&self) -> DocId {
        self.refs.len() as DocId
    }

    /// Stream the snapshot to `writer`
    pub fn save_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        FileHeader::new(self.doc_id_limit(), self.create_serial_num).write_to(writer)?;
        let mut num_values = 0usize;
        let mut bytes = 0usize;
        for entry in &self.refs {
            match self.store.get_tensor_data(*entry) {
                Some(data) => {
                    write_blob(writer, Some(data.as_slice()))?;
                    num_values += 1;
                    bytes += data.as_slice().len();
                }
                None => write_blob(writer, None)?,
            }
        }
        info!(
            target: "tensorcol::attribute",
            name = %self.name,
            doc_id_limit = self.doc_id_limit(),
            num_values,
            bytes,
            "Saved tensor attribute"
        );
        Ok(())
    }

    /// Write the snapshot to a file at `path` and sync it
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.save_to(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl TensorAttribute {
    /// Snapshot the committed documents for saving
    pub fn init_save(&self) -> TensorAttributeSaver {
        let guard = self.take_guard();
        let limit = self.committed_doc_id_limit() as usize;
        TensorAttributeSaver {
            _guard: guard,
            name: self.name.clone(),
            refs: self.refs.snapshot(limit),
            store: self.store.reader(),
            create_serial_num: self.create_serial_num,
        }
    }

    /// Save the committed documents to `writer`
    pub fn save_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.init_save().save_to(writer)
    }

    /// Save the committed documents to a file at `path`
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        self.init_save().save_to_path(path)
    }

    /// Replace the contents of the column with a saved stream.
    ///
    /// Returns `Ok(false)` for an empty stream, leaving the column as it
    /// was. On any error the column also keeps its previous contents.
    pub fn load_from<R: Read>(&mut self, reader: &mut R) -> Result<bool> {
        let Some(header) = FileHeader::read_from(reader)? else {
            return Ok(false);
        };
        if header.version != TENSOR_ATTRIBUTE_VERSION {
            error!(
                target: "tensorcol::attribute",
                name = %self.name,
                version = header.version,
                expected = TENSOR_ATTRIBUTE_VERSION,
                "Unsupported tensor attribute version"
            );
            return Err(Error::UnsupportedVersion {
                version: header.version,
                expected: TENSOR_ATTRIBUTE_VERSION,
            });
        }

        // slots grow with the blobs actually read, never with the header
        let mut refs = RefVector::new(self.config.grow_strategy);
        let mut store = TensorStore::new(self.value_type().clone(), self.config.store)?;
        let mut blob = Vec::new();
        let mut num_values = 0u32;
        for doc in 0..header.doc_id_limit {
            if read_blob(reader, doc, &mut blob)? {
                refs.push(store.store_encoded_tensor(&blob)?);
                num_values += 1;
            } else {
                refs.push(EntryRef::invalid());
            }
        }

        self.create_serial_num = header.create_serial_num;
        self.install(refs, store, header.doc_id_limit, num_values);
        info!(
            target: "tensorcol::attribute",
            name = %self.name,
            doc_id_limit = header.doc_id_limit,
            num_values,
            "Loaded tensor attribute"
        );
        Ok(true)
    }

    /// Replace the contents of the column with a saved file
    pub fn load_from_path(&mut self, path: &Path) -> Result<bool> {
        let file = File::open(path)?;
        self.load_from(&mut BufReader::new(file))
    }
}
