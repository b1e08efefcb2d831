use thiserror::Error;

/// Failures of the local cache layer. Row-level decode problems surface as
/// `Sqlite` via `FromSqlConversionFailure`; `Json` covers encoding on the
/// write path.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache migration failed: {0}")]
    Migration(String),

    #[error("Cache column encode error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
