//! Ordered scanning over store files.
//!
//! [`StoreScanner`] merges the cells of several store files and applies the
//! compaction read rules: delete masking (exact, column, family), the
//! per-column version cap, and TTL expiry. Two modes exist:
//!
//! - [`ScanType::DropDeletes`] — delete markers suppress the puts they cover
//!   and are not emitted themselves. Used when rewriting mob files against
//!   the del set.
//! - [`ScanType::RetainDeletes`] — delete markers are emitted and no masking
//!   is applied. Used when merging del files, whose markers must survive.
//!
//! Cells are pulled in chunks via [`StoreScanner::next`], bounded by the
//! caller's batch limit.

pub mod merge_iterator;

pub use merge_iterator::{CellMergeSource, MergeIterator, StoreFileSource, VecCellSource};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::store::StoreFileReader;
use crate::types::{Cell, CellType};
use crate::Result;

/// Scan mode for compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    /// Apply delete markers and drop them from the output.
    DropDeletes,
    /// Emit delete markers without applying them.
    RetainDeletes,
}

/// Ordered scanner over a set of store files.
pub struct StoreScanner<S: CellMergeSource = StoreFileSource> {
    iter: MergeIterator<S>,
    scan_type: ScanType,
    max_versions: u32,
    ttl: Option<Duration>,
    read_point_ms: u64,
    row_state: RowState,
}

/// Delete and version tracking scoped to the scan position.
#[derive(Default)]
struct RowState {
    /// Current (row, family) scope for family-level deletes.
    row_family: Option<(Bytes, Bytes)>,
    /// Highest DeleteFamily timestamp seen in the current scope.
    family_delete_ts: Option<u64>,
    /// Current (row, family, qualifier) column scope.
    column: Option<(Bytes, Bytes, Bytes)>,
    /// Highest DeleteColumn timestamp seen in the current column.
    column_delete_ts: Option<u64>,
    /// Exact-version delete timestamps seen in the current column.
    exact_delete_ts: Vec<u64>,
    /// Put versions emitted for the current column.
    versions_emitted: u32,
}

impl<S: CellMergeSource> StoreScanner<S> {
    /// Create a scanner over arbitrary sorted sources.
    pub fn new(
        sources: Vec<S>,
        scan_type: ScanType,
        max_versions: u32,
        ttl: Option<Duration>,
        read_point_ms: u64,
    ) -> Result<Self> {
        let mut iter = MergeIterator::new(sources);
        iter.seek_to_first()?;
        Ok(Self {
            iter,
            scan_type,
            max_versions,
            ttl,
            read_point_ms,
            row_state: RowState::default(),
        })
    }

    /// Pull up to `batch_limit` surviving cells into `out`.
    ///
    /// Returns whether more cells remain after this pull.
    pub fn next(&mut self, out: &mut Vec<Cell>, batch_limit: usize) -> Result<bool> {
        while out.len() < batch_limit {
            let cell = match self.iter.current() {
                Some(cell) => cell.clone(),
                None => return Ok(false),
            };
            self.iter.next()?;

            if let Some(cell) = self.process(cell) {
                out.push(cell);
            }
        }
        Ok(self.iter.valid())
    }

    fn process(&mut self, cell: Cell) -> Option<Cell> {
        self.row_state.roll_scopes(&cell);

        if self.is_expired(cell.key.timestamp) {
            return None;
        }

        if cell.is_delete() {
            self.row_state.track_delete(&cell);
            return match self.scan_type {
                ScanType::RetainDeletes => Some(cell),
                ScanType::DropDeletes => None,
            };
        }

        if self.scan_type == ScanType::DropDeletes && self.row_state.is_masked(&cell) {
            return None;
        }

        if self.row_state.versions_emitted >= self.max_versions {
            return None;
        }
        self.row_state.versions_emitted += 1;
        Some(cell)
    }

    fn is_expired(&self, timestamp: u64) -> bool {
        match self.ttl {
            Some(ttl) => timestamp + ttl.as_millis() as u64 <= self.read_point_ms,
            None => false,
        }
    }
}

impl StoreScanner<StoreFileSource> {
    /// Create a scanner over opened store file readers.
    pub fn from_readers(
        readers: Vec<Arc<StoreFileReader>>,
        scan_type: ScanType,
        max_versions: u32,
        ttl: Option<Duration>,
        read_point_ms: u64,
    ) -> Result<Self> {
        let sources = readers.into_iter().map(StoreFileSource::new).collect();
        Self::new(sources, scan_type, max_versions, ttl, read_point_ms)
    }
}

impl RowState {
    /// Reset tracking state when the scan crosses a family or column
    /// boundary.
    fn roll_scopes(&mut self, cell: &Cell) {
        let row_family = (cell.key.row.clone(), cell.key.family.clone());
        if self.row_family.as_ref() != Some(&row_family) {
            self.row_family = Some(row_family);
            self.family_delete_ts = None;
            self.column = None;
        }

        let column = (
            cell.key.row.clone(),
            cell.key.family.clone(),
            cell.key.qualifier.clone(),
        );
        if self.column.as_ref() != Some(&column) {
            self.column = Some(column);
            self.column_delete_ts = None;
            self.exact_delete_ts.clear();
            self.versions_emitted = 0;
        }
    }

    fn track_delete(&mut self, cell: &Cell) {
        let ts = cell.key.timestamp;
        match cell.key.cell_type {
            CellType::DeleteFamily => {
                self.family_delete_ts = Some(self.family_delete_ts.unwrap_or(0).max(ts));
            }
            CellType::DeleteColumn => {
                self.column_delete_ts = Some(self.column_delete_ts.unwrap_or(0).max(ts));
            }
            CellType::Delete => self.exact_delete_ts.push(ts),
            CellType::Put => {}
        }
    }

    fn is_masked(&self, cell: &Cell) -> bool {
        let ts = cell.key.timestamp;
        if self.family_delete_ts.map_or(false, |d| ts <= d) {
            return true;
        }
        if self.column_delete_ts.map_or(false, |d| ts <= d) {
            return true;
        }
        self.exact_delete_ts.contains(&ts)
    }
}
