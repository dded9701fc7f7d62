//! Store file reader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::{Buf, Bytes};

use crate::options::Compression;
use crate::types::Cell;
use crate::{Error, Result};

use super::format::{
    decode_cell, decode_u64, decompress_payload, FILE_MAGIC, FOOTER_SIZE, MAX_SEQ_ID_KEY,
    MOB_CELLS_COUNT_KEY, RECORD_HEADER_SIZE,
};

/// Reader over an immutable store file.
///
/// Mob files are small by construction, so the reader loads the whole file
/// up front: cells in order plus the file-info map. Readers are shared
/// read-only between partition workers.
#[derive(Debug)]
pub struct StoreFileReader {
    path: PathBuf,
    cells: Vec<Cell>,
    file_info: HashMap<Bytes, Bytes>,
}

impl StoreFileReader {
    /// Open a store file, verifying footer magic and record checksums.
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        if data.len() < FOOTER_SIZE {
            return Err(Error::corruption(format!(
                "file {} too short for footer",
                path.display()
            )));
        }

        let mut footer = &data[data.len() - FOOTER_SIZE..];
        let info_offset = footer.get_u64() as usize;
        let cell_count = footer.get_u64() as usize;
        let compression = Compression::from_byte(footer.get_u8())
            .ok_or_else(|| Error::corruption("unknown compression in footer"))?;
        let magic = footer.get_u64();
        if magic != FILE_MAGIC {
            return Err(Error::corruption(format!(
                "bad magic in {}",
                path.display()
            )));
        }
        if info_offset > data.len() - FOOTER_SIZE {
            return Err(Error::corruption("file-info offset out of bounds"));
        }

        let cells = Self::read_cells(&data[..info_offset], cell_count, compression)?;
        let file_info = Self::read_file_info(&data[info_offset..data.len() - FOOTER_SIZE])?;

        Ok(Self {
            path: path.to_path_buf(),
            cells,
            file_info,
        })
    }

    fn read_cells(
        mut data: &[u8],
        expected: usize,
        compression: Compression,
    ) -> Result<Vec<Cell>> {
        let mut cells = Vec::with_capacity(expected);
        while !data.is_empty() {
            if data.len() < RECORD_HEADER_SIZE {
                return Err(Error::corruption("truncated record header"));
            }
            let crc = data.get_u32();
            let len = data.get_u32() as usize;
            if data.len() < len {
                return Err(Error::corruption("truncated record payload"));
            }
            let payload = &data[..len];
            let actual = crc32fast::hash(payload);
            if actual != crc {
                return Err(Error::CrcMismatch {
                    expected: crc,
                    actual,
                });
            }
            cells.push(decode_cell(&decompress_payload(payload, compression)?)?);
            data.advance(len);
        }
        if cells.len() != expected {
            return Err(Error::corruption(format!(
                "footer promises {} cells, found {}",
                expected,
                cells.len()
            )));
        }
        Ok(cells)
    }

    fn read_file_info(mut data: &[u8]) -> Result<HashMap<Bytes, Bytes>> {
        if data.len() < 4 {
            return Err(Error::corruption("truncated file-info block"));
        }
        let count = data.get_u32() as usize;
        let mut info = HashMap::with_capacity(count);
        for _ in 0..count {
            if data.len() < 2 {
                return Err(Error::corruption("truncated file-info entry"));
            }
            let key_len = data.get_u16() as usize;
            if data.len() < key_len + 4 {
                return Err(Error::corruption("truncated file-info entry"));
            }
            let key = Bytes::copy_from_slice(&data[..key_len]);
            data.advance(key_len);
            let val_len = data.get_u32() as usize;
            if data.len() < val_len {
                return Err(Error::corruption("truncated file-info entry"));
            }
            let value = Bytes::copy_from_slice(&data[..val_len]);
            data.advance(val_len);
            info.insert(key, value);
        }
        Ok(info)
    }

    /// The path this reader was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cells of the file, in sorted order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Look up a file-info entry.
    pub fn file_info(&self, key: &[u8]) -> Option<&Bytes> {
        self.file_info.get(key)
    }

    /// The maximum sequence id recorded in the trailer, zero when absent.
    pub fn max_sequence_id(&self) -> u64 {
        self.file_info(MAX_SEQ_ID_KEY)
            .and_then(|v| decode_u64(v).ok())
            .unwrap_or(0)
    }

    /// The mob cell count recorded in the trailer.
    pub fn mob_cells_count(&self) -> Option<u64> {
        self.file_info(MOB_CELLS_COUNT_KEY)
            .and_then(|v| decode_u64(v).ok())
    }
}
