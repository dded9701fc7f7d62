//! Bulkload: atomic attachment of staged reference files to a live table.

use std::path::Path;

use log::info;

use crate::types::TableName;
use crate::util::filename::MobPaths;
use crate::util::fs;
use crate::{Error, Result};

/// Service that attaches externally built reference files to a live table.
///
/// Implementations must be atomic with respect to the table: after a
/// successful call every staged file is visible, after a failed call none
/// are required to be.
pub trait BulkloadService: Send + Sync {
    /// Load every family directory under `staging_dir` into the table.
    fn do_bulk_load(&self, staging_dir: &Path, table: &TableName) -> Result<()>;
}

/// Bulkload into a local directory layout.
///
/// The staging directory holds one subdirectory per family; each staged
/// file is moved into the table's live store directory by rename.
pub struct LocalBulkload {
    paths: MobPaths,
}

impl LocalBulkload {
    /// Create a bulkload service over the table layout.
    pub fn new(paths: MobPaths) -> Self {
        Self { paths }
    }
}

impl BulkloadService for LocalBulkload {
    fn do_bulk_load(&self, staging_dir: &Path, table: &TableName) -> Result<()> {
        if table != self.paths.table() {
            return Err(Error::Bulkload(format!(
                "staging for table {} offered to table {}",
                table,
                self.paths.table()
            )));
        }

        let mut loaded = 0usize;
        for family_entry in fs::list_status(staging_dir)? {
            if family_entry.is_file {
                continue;
            }
            let family = family_entry.file_name();
            let store_dir = self.paths.store_dir(&family);
            fs::create_dir_if_missing(&store_dir)?;

            for file in fs::list_status(&family_entry.path)? {
                if !file.is_file {
                    continue;
                }
                fs::rename(&file.path, &store_dir.join(file.file_name()))?;
                loaded += 1;
            }
        }

        info!(
            "bulkloaded {} reference files from {}",
            loaded,
            staging_dir.display()
        );
        Ok(())
    }
}
