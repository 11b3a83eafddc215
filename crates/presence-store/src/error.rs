//! # Store Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  std::io::Error / serde_json::Error                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (this module) ← Adds the path being written                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Scan loop logs it at error level and keeps tracking in memory         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only saving can fail. Loading always recovers to some table.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// State file errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File system operation failed.
    ///
    /// ## When This Occurs
    /// - Parent directory cannot be created
    /// - Disk full while writing the temporary file
    /// - Rename over the canonical path refused
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The table could not be encoded.
    #[error("Failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Wraps an io error with the operation and path it happened on.
    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
