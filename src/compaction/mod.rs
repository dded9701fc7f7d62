//! Mob file compaction.
//!
//! Compaction turns many small mob files plus a set of del (tombstone)
//! files into fewer, larger mob files, preserving delete semantics and
//! republishing the references the primary row store holds.
//!
//! # Compaction Process
//!
//! 1. Select candidates: split del files from mob files, bucket mob files
//!    into partitions by `(start key, date bucket)` under the family's
//!    partition policy, filter by size threshold.
//! 2. Merge del files until their count is within the configured cap.
//! 3. Compact each partition on the worker pool, in batches: scan the batch
//!    together with all del files, write a new mob file and a reference
//!    file, commit the mob file, bulkload the reference file, archive the
//!    batch inputs.
//! 4. If every candidate was selected, archive the del files too.

pub mod compactor;
pub mod pool;
pub mod select;

pub use compactor::PartitionedMobCompactor;
pub use pool::{TaskHandle, WorkerPool};
pub use select::FileSelector;

use std::path::PathBuf;

use bytes::Bytes;

use crate::util::fs::FileStatus;
use crate::Result;

/// Whether the selection covered every candidate.
///
/// Del files may only be archived after an `AllFiles` compaction; after a
/// `PartFiles` run, unselected mob files may still carry cells the del
/// files suppress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionType {
    /// Every candidate was placed into the request.
    AllFiles,
    /// Some candidates were left out.
    PartFiles,
}

/// Hash/equality key of a partition: start key plus date bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    /// Row prefix shared by the partition's files.
    pub start_key: Bytes,
    /// Date bucket under the active policy, `YYYYMMDD`.
    pub date: String,
}

impl PartitionKey {
    /// Render the key as a directory-name-safe string.
    pub fn as_string(&self) -> String {
        let mut out = String::with_capacity(self.start_key.len() * 2 + 9);
        for b in self.start_key.iter() {
            out.push_str(&format!("{:02x}", b));
        }
        out.push('-');
        out.push_str(&self.date);
        out
    }
}

/// A group of mob files sharing a partition key.
#[derive(Debug, Clone)]
pub struct Partition {
    /// The partition key.
    pub key: PartitionKey,
    /// Mergeable-size cut-off the selector applied to this bucket.
    pub threshold: u64,
    /// Maximum date among member files; names the compaction output.
    pub latest_date: String,
    /// Member files.
    pub files: Vec<FileStatus>,
}

impl Partition {
    /// Create an empty partition for a key.
    pub fn new(key: PartitionKey, threshold: u64) -> Self {
        let latest_date = key.date.clone();
        Self {
            key,
            threshold,
            latest_date,
            files: Vec::new(),
        }
    }

    /// Add a member file, tracking the latest file date.
    pub fn add_file(&mut self, file: FileStatus, file_date: &str) {
        if file_date > self.latest_date.as_str() {
            self.latest_date = file_date.to_string();
        }
        self.files.push(file);
    }

    /// Number of member files.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// The outcome of selection: what to compact and how.
#[derive(Debug, Clone)]
pub struct CompactionRequest {
    /// Partitions of mob files to compact.
    pub partitions: Vec<Partition>,
    /// All del files, applied globally.
    pub del_files: Vec<FileStatus>,
    /// Wall-clock time of selection, milliseconds.
    pub selection_time: u64,
    /// Whether every candidate was selected.
    pub compaction_type: CompactionType,
}

impl CompactionRequest {
    /// Whether this request covers all candidates.
    pub fn is_all_files(&self) -> bool {
        self.compaction_type == CompactionType::AllFiles
    }
}

/// A compactor of mob files.
///
/// Implementations choose the grouping and execution strategy; the caller
/// hands over the candidate file statuses and receives the list of mob
/// files that exist after compaction (new outputs plus carried-over
/// singletons).
pub trait MobFileCompactor {
    /// Compact the candidates. `is_force_all_files` selects every mob file
    /// regardless of size threshold.
    fn compact(&self, files: Vec<FileStatus>, is_force_all_files: bool) -> Result<Vec<PathBuf>>;
}
