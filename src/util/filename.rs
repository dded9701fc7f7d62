//! Mob file naming conventions and directory layout.
//!
//! A mob file name encodes the date bucket and start key of the cells it
//! holds:
//!
//! ```text
//! d<YYYYMMDD>_<hex start key>[_<uuid>]        mob file
//! d<YYYYMMDD>_<hex start key>[_<uuid>]_del    del (tombstone) file
//! ```
//!
//! Generated names always carry a uuid suffix so repeated compactions of the
//! same partition never collide.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::types::TableName;
use crate::{Error, Result};

/// Suffix marking a del (tombstone) file.
pub const DEL_FILE_SUFFIX: &str = "_del";

/// Extension marking a file link.
pub const LINK_EXTENSION: &str = "link";

/// A parsed or generated mob file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobFileName {
    date: String,
    start_key: Bytes,
    uuid: Option<String>,
    is_del: bool,
}

impl MobFileName {
    /// Create a name for a new mob file with a fresh uuid suffix.
    pub fn create(start_key: impl Into<Bytes>, date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            start_key: start_key.into(),
            uuid: Some(Uuid::new_v4().simple().to_string()),
            is_del: false,
        }
    }

    /// Create a name for a new del file with a fresh uuid suffix.
    pub fn create_del(start_key: impl Into<Bytes>, date: impl Into<String>) -> Self {
        Self {
            is_del: true,
            ..Self::create(start_key, date)
        }
    }

    /// Parse a file name, rejecting names outside the convention.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || Error::InvalidFileName(name.to_string());

        let (body, is_del) = match name.strip_suffix(DEL_FILE_SUFFIX) {
            Some(body) => (body, true),
            None => (name, false),
        };

        let body = body.strip_prefix('d').ok_or_else(invalid)?;
        if body.len() < 9 || body.as_bytes()[8] != b'_' {
            return Err(invalid());
        }
        let (date, rest) = body.split_at(8);
        if !date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let rest = &rest[1..];

        let (hex_key, uuid) = match rest.split_once('_') {
            Some((hex_key, uuid)) if !uuid.is_empty() => (hex_key, Some(uuid.to_string())),
            Some(_) => return Err(invalid()),
            None => (rest, None),
        };

        Ok(Self {
            date: date.to_string(),
            start_key: decode_hex(hex_key).ok_or_else(invalid)?,
            uuid,
            is_del,
        })
    }

    /// The date bucket encoded in the name, `YYYYMMDD`.
    pub fn date(&self) -> &str {
        &self.date
    }

    /// The start key encoded in the name.
    pub fn start_key(&self) -> &Bytes {
        &self.start_key
    }

    /// Whether this names a del file.
    pub fn is_del(&self) -> bool {
        self.is_del
    }

    /// Render the file name.
    pub fn file_name(&self) -> String {
        let mut name = format!("d{}_{}", self.date, encode_hex(&self.start_key));
        if let Some(uuid) = &self.uuid {
            name.push('_');
            name.push_str(uuid);
        }
        if self.is_del {
            name.push_str(DEL_FILE_SUFFIX);
        }
        name
    }
}

/// Check whether a file name denotes a del file.
pub fn is_del_file_name(name: &str) -> bool {
    name.ends_with(DEL_FILE_SUFFIX)
}

/// Check whether a path denotes a file link.
pub fn is_link_path(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == LINK_EXTENSION)
}

/// Parse `YYYYMMDD` into a calendar date.
pub fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y%m%d").ok()
}

/// Format a calendar date as `YYYYMMDD`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Directory layout of a mob-enabled table.
///
/// ```text
/// <root>/mob/.tmp/                                     temp outputs
/// <root>/mob/.tmp/bulkload/<ns>/<table>/<partition>/   ref staging
/// <root>/mob/<ns>/<table>/<family>/                    mob family dir
/// <root>/data/<ns>/<table>/<family>/                   live store dir
/// <root>/archive/<ns>/<table>/<family>/                archived inputs
/// ```
#[derive(Debug, Clone)]
pub struct MobPaths {
    root: PathBuf,
    table: TableName,
}

impl MobPaths {
    /// Create the layout for a table under a root directory.
    pub fn new(root: impl Into<PathBuf>, table: TableName) -> Self {
        Self {
            root: root.into(),
            table,
        }
    }

    /// The table this layout belongs to.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Directory where temporary outputs are written.
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("mob").join(".tmp")
    }

    /// Root of the bulkload staging area for this table.
    pub fn bulkload_dir(&self) -> PathBuf {
        self.temp_dir()
            .join("bulkload")
            .join(&self.table.namespace)
            .join(&self.table.qualifier)
    }

    /// Disjoint staging directory for one partition.
    pub fn bulkload_partition_dir(&self, partition: &str) -> PathBuf {
        self.bulkload_dir().join(partition)
    }

    /// Staging directory for one partition's family files.
    pub fn bulkload_family_dir(&self, partition: &str, family: &str) -> PathBuf {
        self.bulkload_partition_dir(partition).join(family)
    }

    /// Directory of committed mob and del files for a family.
    pub fn family_dir(&self, family: &str) -> PathBuf {
        self.root
            .join("mob")
            .join(&self.table.namespace)
            .join(&self.table.qualifier)
            .join(family)
    }

    /// Live store directory reference files are bulkloaded into.
    pub fn store_dir(&self, family: &str) -> PathBuf {
        self.root
            .join("data")
            .join(&self.table.namespace)
            .join(&self.table.qualifier)
            .join(family)
    }

    /// Archive directory for superseded inputs of a family.
    pub fn archive_family_dir(&self, family: &str) -> PathBuf {
        self.root
            .join("archive")
            .join(&self.table.namespace)
            .join(&self.table.qualifier)
            .join(family)
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn decode_hex(hex: &str) -> Option<Bytes> {
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        out.push((hi * 16 + lo) as u8);
    }
    Some(Bytes::from(out))
}
