//! On-disk format for mob, reference and del store files.
//!
//! A store file holds its cells in sorted order, followed by a file-info
//! block and a fixed-size footer:
//!
//! ```text
//! [record]* [file-info] [footer]
//! record    = crc32 (4) | payload_len (4) | payload
//! payload   = encoded cell, optionally compressed per file
//! file-info = entry_count (4), then (key_len (2) | key | val_len (4) | val)*
//! footer    = info_offset (8) | cell_count (8) | compression (1) | magic (8)
//! ```
//!
//! The CRC covers the payload as written (post-compression).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::options::Compression;
use crate::types::{Cell, CellKey, CellType, Tag};
use crate::{Error, Result};

/// Magic number identifying a mobstore file.
pub const FILE_MAGIC: u64 = 0x6d6f_6273_7466_6c31; // "mobstfl1"

/// Footer size: info_offset (8) + cell_count (8) + compression (1) + magic (8).
pub const FOOTER_SIZE: usize = 25;

/// Record header size: crc (4) + payload_len (4).
pub const RECORD_HEADER_SIZE: usize = 8;

/// File-info key for the maximum sequence id of the inputs.
pub const MAX_SEQ_ID_KEY: &[u8] = b"MAX_SEQ_ID";

/// File-info key for the number of mob cells in the file.
pub const MOB_CELLS_COUNT_KEY: &[u8] = b"MOB_CELLS_COUNT";

/// File-info key for the bulkload timestamp of a reference file.
pub const BULKLOAD_TIME_KEY: &[u8] = b"BULKLOAD_TIMESTAMP";

/// File-info key marking output of a major compaction.
pub const MAJOR_COMPACTION_KEY: &[u8] = b"MAJOR_COMPACTION";

/// Encode a u64 as big-endian file-info bytes.
pub fn encode_u64(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

/// Decode big-endian file-info bytes into a u64.
pub fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::corruption("file-info value is not 8 bytes"))?;
    Ok(u64::from_be_bytes(arr))
}

/// Encode a cell into a record payload.
pub fn encode_cell(cell: &Cell) -> Bytes {
    let mut buf = BytesMut::with_capacity(cell.approximate_size() + 16);
    buf.put_u16(cell.key.row.len() as u16);
    buf.put_slice(&cell.key.row);
    buf.put_u8(cell.key.family.len() as u8);
    buf.put_slice(&cell.key.family);
    buf.put_u16(cell.key.qualifier.len() as u16);
    buf.put_slice(&cell.key.qualifier);
    buf.put_u64(cell.key.timestamp);
    buf.put_u8(cell.key.cell_type.to_byte());
    buf.put_u8(cell.tags.len() as u8);
    for tag in &cell.tags {
        buf.put_u8(tag.tag_type);
        buf.put_u16(tag.value.len() as u16);
        buf.put_slice(&tag.value);
    }
    buf.put_u32(cell.value.len() as u32);
    buf.put_slice(&cell.value);
    buf.freeze()
}

/// Decode a record payload into a cell.
pub fn decode_cell(mut data: &[u8]) -> Result<Cell> {
    let truncated = || Error::corruption("truncated cell record");

    let row_len = decode_u16(&mut data)? as usize;
    let row = take(&mut data, row_len)?;
    if data.is_empty() {
        return Err(truncated());
    }
    let family_len = data.get_u8() as usize;
    let family = take(&mut data, family_len)?;
    let qualifier_len = decode_u16(&mut data)? as usize;
    let qualifier = take(&mut data, qualifier_len)?;

    if data.len() < 10 {
        return Err(truncated());
    }
    let timestamp = data.get_u64();
    let cell_type = CellType::from_byte(data.get_u8())
        .ok_or_else(|| Error::corruption("unknown cell type"))?;
    let tag_count = data.get_u8() as usize;

    let mut tags = Vec::with_capacity(tag_count);
    for _ in 0..tag_count {
        if data.is_empty() {
            return Err(truncated());
        }
        let tag_type = data.get_u8();
        let tag_len = decode_u16(&mut data)? as usize;
        tags.push(Tag::new(tag_type, take(&mut data, tag_len)?));
    }

    if data.len() < 4 {
        return Err(truncated());
    }
    let value_len = data.get_u32() as usize;
    let value = take(&mut data, value_len)?;

    Ok(Cell {
        key: CellKey {
            row,
            family,
            qualifier,
            timestamp,
            cell_type,
        },
        value,
        tags,
    })
}

/// Compress a record payload according to the file's compression.
pub fn compress_payload(payload: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(payload.to_vec()),
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(payload)),
        Compression::Snappy => snap::raw::Encoder::new()
            .compress_vec(payload)
            .map_err(|e| Error::corruption(format!("snappy compress failed: {}", e))),
    }
}

/// Decompress a record payload according to the file's compression.
pub fn decompress_payload(payload: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(payload.to_vec()),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| Error::corruption(format!("lz4 decompress failed: {}", e))),
        Compression::Snappy => snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| Error::corruption(format!("snappy decompress failed: {}", e))),
    }
}

fn decode_u16(data: &mut &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(Error::corruption("truncated cell record"));
    }
    Ok(data.get_u16())
}

fn take(data: &mut &[u8], n: usize) -> Result<Bytes> {
    if data.len() < n {
        return Err(Error::corruption("truncated cell record"));
    }
    let out = Bytes::copy_from_slice(&data[..n]);
    data.advance(n);
    Ok(out)
}
