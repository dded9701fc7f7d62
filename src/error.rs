//! Error types for mobstore.

use std::io;
use thiserror::Error;

/// Result type alias for mobstore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for compaction operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Data corruption detected.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// A file name that does not follow the MOB naming convention.
    #[error("Invalid mob file name: {0}")]
    InvalidFileName(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Some partitions failed while others completed.
    #[error("Partial failure: {failed} of {total} partitions failed")]
    PartialFailure { failed: usize, total: usize },

    /// Bulkload of reference files failed.
    #[error("Bulkload error: {0}")]
    Bulkload(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Error::NotFound(err.to_string())
        } else {
            Error::Io(err.to_string())
        }
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error indicates a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::CrcMismatch { .. } | Error::InvalidFileName(_)
        )
    }
}
