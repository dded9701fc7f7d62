//! Store file writer and the factories for the three output kinds.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use uuid::Uuid;

use crate::options::Compression;
use crate::types::{Cell, CellKey};
use crate::util::filename::MobFileName;
use crate::Result;

use super::format::{
    compress_payload, encode_cell, encode_u64, FILE_MAGIC, MAJOR_COMPACTION_KEY, MAX_SEQ_ID_KEY,
    MOB_CELLS_COUNT_KEY,
};

/// Writer for building store files.
///
/// Cells must be appended in sorted order. The file-info entries added via
/// [`append_metadata`](StoreFileWriter::append_metadata) and
/// [`append_file_info`](StoreFileWriter::append_file_info) are written into
/// the trailer by [`close`](StoreFileWriter::close).
pub struct StoreFileWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    compression: Compression,
    offset: u64,
    cell_count: u64,
    last_key: Option<CellKey>,
    file_info: Vec<(Bytes, Bytes)>,
}

impl StoreFileWriter {
    /// Create a writer at the given path.
    pub fn new(path: &Path, compression: Compression) -> Result<Self> {
        Self::with_capacity(path, compression, 8 * 1024)
    }

    /// Create a writer with an explicit write-buffer capacity.
    pub fn with_capacity(path: &Path, compression: Compression, capacity: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::util::fs::create_dir_if_missing(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::with_capacity(capacity, file),
            path: path.to_path_buf(),
            compression,
            offset: 0,
            cell_count: 0,
            last_key: None,
            file_info: Vec::new(),
        })
    }

    /// The path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The number of cells appended so far.
    pub fn cell_count(&self) -> u64 {
        self.cell_count
    }

    /// Append a cell.
    pub fn append(&mut self, cell: &Cell) -> Result<()> {
        debug_assert!(
            self.last_key.as_ref().map_or(true, |last| *last <= cell.key),
            "cells must be appended in sorted order"
        );

        let payload = compress_payload(&encode_cell(cell), self.compression)?;
        let crc = crc32fast::hash(&payload);

        self.writer.write_all(&crc.to_be_bytes())?;
        self.writer.write_all(&(payload.len() as u32).to_be_bytes())?;
        self.writer.write_all(&payload)?;
        self.offset += (8 + payload.len()) as u64;

        self.last_key = Some(cell.key.clone());
        self.cell_count += 1;
        Ok(())
    }

    /// Record the standard trailer metadata: max sequence id, whether this
    /// file is the output of a major compaction, and optionally the mob
    /// cell count.
    pub fn append_metadata(
        &mut self,
        max_seq_id: u64,
        major_compaction: bool,
        cells_count: Option<u64>,
    ) {
        self.append_file_info(MAX_SEQ_ID_KEY, encode_u64(max_seq_id));
        self.append_file_info(
            MAJOR_COMPACTION_KEY,
            Bytes::from_static(if major_compaction { b"1" } else { b"0" }),
        );
        if let Some(count) = cells_count {
            self.append_file_info(MOB_CELLS_COUNT_KEY, encode_u64(count));
        }
    }

    /// Record an arbitrary file-info entry.
    pub fn append_file_info(&mut self, key: &[u8], value: Bytes) {
        self.file_info
            .push((Bytes::copy_from_slice(key), value));
    }

    /// Write the file-info block and footer, sync, and return the path.
    pub fn close(mut self) -> Result<PathBuf> {
        let info_offset = self.offset;

        self.writer
            .write_all(&(self.file_info.len() as u32).to_be_bytes())?;
        for (key, value) in &self.file_info {
            self.writer.write_all(&(key.len() as u16).to_be_bytes())?;
            self.writer.write_all(key)?;
            self.writer.write_all(&(value.len() as u32).to_be_bytes())?;
            self.writer.write_all(value)?;
        }

        self.writer.write_all(&info_offset.to_be_bytes())?;
        self.writer.write_all(&self.cell_count.to_be_bytes())?;
        self.writer.write_all(&[self.compression.to_byte()])?;
        self.writer.write_all(&FILE_MAGIC.to_be_bytes())?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.path)
    }
}

/// Create a writer for a new mob file in `dir`, named from the partition's
/// start key and latest date.
pub fn create_mob_writer(
    dir: &Path,
    start_key: &Bytes,
    date: &str,
    compression: Compression,
) -> Result<StoreFileWriter> {
    let name = MobFileName::create(start_key.clone(), date);
    StoreFileWriter::new(&dir.join(name.file_name()), compression)
}

/// Create a writer for a reference file in the bulkload staging directory.
///
/// `expected_cells` sizes the write buffer; reference cells are small and
/// uniform.
pub fn create_ref_writer(dir: &Path, expected_cells: u64) -> Result<StoreFileWriter> {
    let capacity = (expected_cells as usize * 64).clamp(8 * 1024, 1024 * 1024);
    let name = Uuid::new_v4().simple().to_string();
    StoreFileWriter::with_capacity(&dir.join(name), Compression::None, capacity)
}

/// Create a writer for a new del file in `dir`.
pub fn create_del_writer(
    dir: &Path,
    start_key: &Bytes,
    date: &str,
    compression: Compression,
) -> Result<StoreFileWriter> {
    let name = MobFileName::create_del(start_key.clone(), date);
    StoreFileWriter::new(&dir.join(name.file_name()), compression)
}
