//! # mobstore
//!
//! A partitioned compaction engine for MOB (medium object) store files.
//!
//! A mob-enabled table keeps large cell values out of its primary row
//! store: rows hold small reference cells naming an immutable mob file that
//! carries the payload. Over time the store accumulates many small mob
//! files and del (tombstone) files. This crate compacts them: fewer, larger
//! mob files, a bounded del set, and freshly bulkloaded reference files,
//! with delete semantics preserved throughout.
//!
//! ## Features
//!
//! - **Partitioned selection**: mob files group by `(start key, date
//!   bucket)` under a daily, weekly or monthly policy with escalating size
//!   thresholds
//! - **Bounded del merging**: tombstone files merge recursively until their
//!   count fits the configured cap
//! - **Parallel execution**: partitions compact concurrently on a bounded
//!   worker pool, batches sequentially within a partition
//! - **Atomic publication**: new mob files commit by rename and reference
//!   files attach via bulkload, with staged cleanup on every failure path
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mobstore::{
//!     ColumnFamily, LocalBulkload, MobFileCompactor, MobPaths, Options,
//!     PartitionedMobCompactor, TableName,
//! };
//! use std::sync::Arc;
//!
//! let paths = MobPaths::new("/data/root", TableName::new("orders"));
//! let bulkload = Arc::new(LocalBulkload::new(paths.clone()));
//! let compactor = PartitionedMobCompactor::new(
//!     Options::default(),
//!     ColumnFamily::new("mob"),
//!     paths,
//!     bulkload,
//! )?;
//!
//! let candidates = mobstore::util::fs::list_status(&family_dir)?;
//! let new_files = compactor.compact(candidates, false)?;
//! ```

// Public modules
pub mod error;
pub mod family;
pub mod options;
pub mod types;

// Engine modules
pub mod bulkload;
pub mod compaction;
pub mod scan;
pub mod store;
pub mod util;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use family::{ColumnFamily, PartitionPolicy};
pub use options::{Compression, Options, OptionsBuilder};
pub use types::{Cell, CellKey, CellType, TableName, Tag};

// Compaction
pub use compaction::{
    CompactionRequest, CompactionType, FileSelector, MobFileCompactor, Partition,
    PartitionedMobCompactor, PartitionKey, WorkerPool,
};

// Store files
pub use store::{StoreFile, StoreFileReader, StoreFileWriter};

// Scanning
pub use scan::{ScanType, StoreScanner};

// Bulkload
pub use bulkload::{BulkloadService, LocalBulkload};

// Layout and filesystem
pub use util::filename::{MobFileName, MobPaths};
pub use util::fs::FileStatus;
