//! Error taxonomy of the harness library.
//!
//! Setup problems (database, object storage, fixtures) are kept apart from request timeouts and
//! decode failures so the runner can map each onto its own case outcome.

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] medata_types::IdError),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("database unreachable: {0}")]
    DatabaseUnavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored row is invalid: {0}")]
    InvalidRow(String),

    #[error("object storage unreachable: {0}")]
    StorageUnavailable(String),
    #[error("object storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
    #[error("snapshot does not match table layout: {0}")]
    Snapshot(String),

    #[error("fixture setup failed: {0}")]
    Fixture(String),
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;
