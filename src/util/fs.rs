//! Local filesystem service.
//!
//! Thin wrappers over `std::fs` with the semantics compaction relies on:
//! NotFound-signaling probes, tolerant deletes, atomic commit-by-rename, and
//! archival moves that accept already-archived entries.

use std::io;
use std::path::{Path, PathBuf};

use log::warn;

use crate::{Error, Result};

/// The result of probing a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Path of the entry.
    pub path: PathBuf,
    /// Length in bytes.
    pub len: u64,
    /// Whether the entry is a regular file.
    pub is_file: bool,
}

impl FileStatus {
    /// Create a status value directly, for callers that already know the
    /// answer (selection tests, fabricated candidates).
    pub fn new(path: impl Into<PathBuf>, len: u64, is_file: bool) -> Self {
        Self {
            path: path.into(),
            len,
            is_file,
        }
    }

    /// The file name portion of the path, lossy-decoded.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Probe a path, signaling `NotFound` when it does not exist.
pub fn get_file_status(path: &Path) -> Result<FileStatus> {
    let meta = std::fs::metadata(path)?;
    Ok(FileStatus {
        path: path.to_path_buf(),
        len: meta.len(),
        is_file: meta.is_file(),
    })
}

/// Check whether a path exists.
pub fn file_exists(path: &Path) -> bool {
    path.exists()
}

/// Delete a path, ignoring "not found" errors.
pub fn delete_path(path: &Path, recursive: bool) -> Result<()> {
    let result = if path.is_dir() {
        if recursive {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_dir(path)
        }
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Rename a file or directory.
pub fn rename(src: &Path, dst: &Path) -> Result<()> {
    std::fs::rename(src, dst)?;
    Ok(())
}

/// Create a directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// List the entries of a directory as file statuses.
///
/// A missing directory lists as empty.
pub fn list_status(dir: &Path) -> Result<Vec<FileStatus>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut statuses = Vec::new();
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        statuses.push(FileStatus {
            path: entry.path(),
            len: meta.len(),
            is_file: meta.is_file(),
        });
    }
    statuses.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(statuses)
}

/// Atomically move a finished file into its target directory, keeping the
/// file name. Returns the committed path.
pub fn commit_file(src: &Path, target_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| Error::internal(format!("no file name in {}", src.display())))?;
    create_dir_if_missing(target_dir)?;
    let dst = target_dir.join(name);
    std::fs::rename(src, &dst)?;
    Ok(dst)
}

/// Move superseded files into the archive directory.
///
/// An entry already present in the archive is treated as archived: the
/// source is deleted instead of renamed over it.
pub fn remove_mob_files(archive_dir: &Path, files: &[PathBuf]) -> Result<()> {
    create_dir_if_missing(archive_dir)?;
    for file in files {
        let name = file
            .file_name()
            .ok_or_else(|| Error::internal(format!("no file name in {}", file.display())))?;
        let target = archive_dir.join(name);
        if target.exists() {
            delete_path(file, false)?;
        } else {
            std::fs::rename(file, &target)?;
        }
    }
    Ok(())
}

/// Resolve a file link: a `.link` file whose body lists candidate target
/// paths, one per line. The first existing target wins; `None` when no
/// target exists.
pub fn resolve_link(link: &Path) -> Result<Option<FileStatus>> {
    let body = std::fs::read_to_string(link)?;
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match get_file_status(Path::new(line)) {
            Ok(status) => return Ok(Some(status)),
            Err(e) if e.is_not_found() => {
                warn!("link target {} not found, trying next", line);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}
