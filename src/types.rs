//! Core cell and table types for mobstore.

use bytes::Bytes;
use std::cmp::Ordering;
use std::fmt;

/// Tag type carrying the fully-qualified name of the table that owns a
/// reference cell.
pub const TABLE_NAME_TAG_TYPE: u8 = 6;

/// Cell type indicator.
///
/// The codes match their on-disk encoding. Higher codes sort first among
/// cells that share a row, family, qualifier and timestamp, so delete
/// markers are seen before the puts they suppress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellType {
    /// Normal value.
    Put = 4,
    /// Deletes the put with the exact same timestamp.
    Delete = 8,
    /// Deletes all versions of a column at or below the timestamp.
    DeleteColumn = 12,
    /// Deletes all columns of a family at or below the timestamp.
    DeleteFamily = 14,
}

impl CellType {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            4 => Some(CellType::Put),
            8 => Some(CellType::Delete),
            12 => Some(CellType::DeleteColumn),
            14 => Some(CellType::DeleteFamily),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Check if this is any kind of delete marker.
    pub fn is_delete(&self) -> bool {
        !matches!(self, CellType::Put)
    }
}

/// A cell tag: a typed byte string attached to a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// The tag type code.
    pub tag_type: u8,
    /// The tag payload.
    pub value: Bytes,
}

impl Tag {
    /// Create a new tag.
    pub fn new(tag_type: u8, value: impl Into<Bytes>) -> Self {
        Self {
            tag_type,
            value: value.into(),
        }
    }

    /// Create a table-name tag for reference cells.
    pub fn table_name(table: &TableName) -> Self {
        Self::new(TABLE_NAME_TAG_TYPE, table.to_string().into_bytes())
    }
}

/// The coordinate of a cell.
///
/// Ordering is row, family, qualifier ascending, then timestamp descending
/// (newest first), then cell-type code descending (deletes first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellKey {
    /// Row key.
    pub row: Bytes,
    /// Column family name.
    pub family: Bytes,
    /// Column qualifier.
    pub qualifier: Bytes,
    /// Timestamp in milliseconds.
    pub timestamp: u64,
    /// Cell type.
    pub cell_type: CellType,
}

impl Ord for CellKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.family.cmp(&other.family))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| other.cell_type.to_byte().cmp(&self.cell_type.to_byte()))
    }
}

impl PartialOrd for CellKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A single cell: coordinate, value, and tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// The cell coordinate.
    pub key: CellKey,
    /// The cell value.
    pub value: Bytes,
    /// Attached tags.
    pub tags: Vec<Tag>,
}

impl Cell {
    /// Create a new put cell without tags.
    pub fn put(
        row: impl Into<Bytes>,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        timestamp: u64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            key: CellKey {
                row: row.into(),
                family: family.into(),
                qualifier: qualifier.into(),
                timestamp,
                cell_type: CellType::Put,
            },
            value: value.into(),
            tags: Vec::new(),
        }
    }

    /// Create a delete marker of the given kind with an empty value.
    pub fn delete(
        row: impl Into<Bytes>,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        timestamp: u64,
        cell_type: CellType,
    ) -> Self {
        debug_assert!(cell_type.is_delete());
        Self {
            key: CellKey {
                row: row.into(),
                family: family.into(),
                qualifier: qualifier.into(),
                timestamp,
                cell_type,
            },
            value: Bytes::new(),
            tags: Vec::new(),
        }
    }

    /// Check if this cell is a delete marker.
    pub fn is_delete(&self) -> bool {
        self.key.cell_type.is_delete()
    }

    /// Attach a tag, returning the cell.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Approximate heap size of the cell, used for write accounting.
    pub fn approximate_size(&self) -> usize {
        self.key.row.len()
            + self.key.family.len()
            + self.key.qualifier.len()
            + self.value.len()
            + self.tags.iter().map(|t| t.value.len() + 1).sum::<usize>()
            + 16
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// A namespaced table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    /// Namespace, "default" when not set.
    pub namespace: String,
    /// Table qualifier.
    pub qualifier: String,
}

impl TableName {
    /// Create a table name in the default namespace.
    pub fn new(qualifier: impl Into<String>) -> Self {
        Self {
            namespace: "default".to_string(),
            qualifier: qualifier.into(),
        }
    }

    /// Create a table name with an explicit namespace.
    pub fn with_namespace(namespace: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            qualifier: qualifier.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.qualifier)
    }
}
