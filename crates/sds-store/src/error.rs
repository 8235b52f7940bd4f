/// Errors from dirstate table operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The SQLite engine reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error around the database file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded into its value type.
    #[error("cannot decode row of table {table}: {reason}")]
    Decode { table: &'static str, reason: String },

    /// The connection has been closed and not reopened.
    #[error("database connection is closed")]
    Closed,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
