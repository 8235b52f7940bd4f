//! Error types for the working-state crate.

use std::path::PathBuf;

/// Errors that can occur while operating on the working-copy state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The database rejected or failed an operation.
    #[error("dirstate storage error: {0}")]
    StorageIo(#[from] sds_store::StoreError),

    /// The caller broke an operation's contract.
    #[error("invalid dirstate operation: {0}")]
    InvalidState(String),

    /// Tracking the path would clash with a tracked file or directory.
    #[error("path conflict: {0}")]
    PathConflict(String),

    /// Saving, restoring or clearing a backup failed.
    #[error("backup of {path} failed: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The shadow `dirstate` file could not be written.
    #[error("could not write shadow dirstate {path}: {source}")]
    ShadowFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for working-state results.
pub type StateResult<T> = Result<T, StateError>;
