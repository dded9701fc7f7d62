//! Store files: the immutable cell files compaction reads and writes.
//!
//! A [`StoreFile`] is a value (the probed [`FileStatus`]) plus an owned,
//! lazily created reader handle. Reader creation is idempotent and the
//! handle is an `Arc`, so del-file readers can be pre-opened once and shared
//! read-only across partition workers.

pub mod format;
pub mod reader;
pub mod writer;

pub use reader::StoreFileReader;
pub use writer::{create_del_writer, create_mob_writer, create_ref_writer, StoreFileWriter};

use std::path::Path;
use std::sync::Arc;

use crate::util::fs::FileStatus;
use crate::Result;

/// An immutable store file and its optional reader handle.
#[derive(Clone)]
pub struct StoreFile {
    status: FileStatus,
    reader: Option<Arc<StoreFileReader>>,
}

impl StoreFile {
    /// Wrap an already probed file.
    pub fn new(status: FileStatus) -> Self {
        Self {
            status,
            reader: None,
        }
    }

    /// Probe and wrap a path.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(crate::util::fs::get_file_status(path)?))
    }

    /// The probed status of the file.
    pub fn status(&self) -> &FileStatus {
        &self.status
    }

    /// The path of the file.
    pub fn path(&self) -> &Path {
        &self.status.path
    }

    /// Create the reader if it does not exist yet and return a shared
    /// handle. Idempotent.
    pub fn create_reader(&mut self) -> Result<Arc<StoreFileReader>> {
        if self.reader.is_none() {
            self.reader = Some(Arc::new(StoreFileReader::open(&self.status.path)?));
        }
        Ok(Arc::clone(self.reader.as_ref().expect("reader just created")))
    }

    /// The reader handle, if created.
    pub fn reader(&self) -> Option<&Arc<StoreFileReader>> {
        self.reader.as_ref()
    }

    /// Drop this file's reader handle. Other holders of the `Arc` keep
    /// theirs; the underlying data is freed when the last handle drops.
    pub fn close_reader(&mut self) {
        self.reader = None;
    }

    /// The maximum sequence id from the file trailer.
    pub fn max_sequence_id(&mut self) -> Result<u64> {
        Ok(self.create_reader()?.max_sequence_id())
    }

    /// The mob cell count from the file trailer.
    pub fn mob_cells_count(&mut self) -> Result<Option<u64>> {
        Ok(self.create_reader()?.mob_cells_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Compression;
    use crate::types::Cell;
    use tempfile::tempdir;

    #[test]
    fn test_create_reader_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");

        let mut writer = StoreFileWriter::new(&path, Compression::None).unwrap();
        writer.append(&Cell::put("a", "f", "q", 1, "v")).unwrap();
        writer.append_metadata(3, false, Some(1));
        writer.close().unwrap();

        let mut file = StoreFile::open(&path).unwrap();
        assert!(file.reader().is_none());

        let first = file.create_reader().unwrap();
        let second = file.create_reader().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert_eq!(file.max_sequence_id().unwrap(), 3);

        file.close_reader();
        assert!(file.reader().is_none());
        // The shared handle stays readable after the owner closed its own.
        assert_eq!(first.cells().len(), 1);
    }
}
