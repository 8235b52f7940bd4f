use std::path::PathBuf;

/// Errors from the flat-format bridge.
#[derive(Debug, thiserror::Error)]
pub enum FlatError {
    /// Converting between representations failed. The destination file is
    /// either absent or unchanged.
    #[error("dirstate conversion to {path} failed: {reason}")]
    ConversionFailure { path: PathBuf, reason: String },

    /// The flat file does not follow the expected layout.
    #[error("corrupt flat dirstate: {0}")]
    Corrupt(String),

    #[error(transparent)]
    State(#[from] sds_state::StateError),

    #[error(transparent)]
    Store(#[from] sds_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FlatResult<T> = Result<T, FlatError>;
