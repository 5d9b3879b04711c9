use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "transaction database not found: {0} — import the dataset first (vigil expects a DuckDB file built from the transaction CSVs)"
    )]
    DatabaseNotFound(PathBuf),

    #[error("database still locked after {attempts} read-only open attempts: {source}")]
    Locked {
        attempts: u32,
        source: duckdb::Error,
    },

    #[error("no results for query")]
    NoResults,

    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("atomic replace failed: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("{0}")]
    Other(String),
}
