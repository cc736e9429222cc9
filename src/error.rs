//! Typed error taxonomy for PAMPAX.
//!
//! Pure components (intent classification, policy derivation, token-model
//! arithmetic) never fail; everything that touches storage, the filesystem,
//! or a network provider returns `Result<T, PampaxError>`.

use thiserror::Error;

/// Every error kind the core distinguishes.
///
/// `BudgetExceeded` is intentionally absent — running out of budget is a
/// stopping reason recorded on a `Bundle`, not an error variant.
#[derive(Debug, Error)]
pub enum PampaxError {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("storage: not found: {message}")]
    StorageNotFound { message: String },

    #[error("storage: corrupted: {message}")]
    StorageCorrupted { message: String },

    #[error("storage: busy: {message}")]
    StorageBusy { message: String },

    #[error("storage: read-only: {message}")]
    StorageReadOnly { message: String },

    #[error("file too large: {path} is {size} bytes, limit is {limit} bytes")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("embedder unavailable: {message}")]
    EmbedderUnavailable { message: String },

    #[error("embedder rate limited: {message}")]
    EmbedderRateLimited { message: String },

    #[error("invalid embedding model: {message}")]
    EmbedderInvalidModel { message: String },

    #[error("reranker error: {message}")]
    Reranker { message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, PampaxError>;

impl PampaxError {
    /// CLI exit code taxonomy: 0 ok, 1 degraded, 2 config,
    /// 3 timeout, 4 internal. Storage/embedder/reranker errors that don't
    /// abort the whole process map to internal (4); callers that can
    /// recover (e.g. retriever treating a stream error as empty) don't
    /// propagate the error at all.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            PampaxError::Config { .. } => 2,
            PampaxError::Timeout { .. } => 3,
            PampaxError::Cancelled => 3,
            _ => 4,
        }
    }

    /// One-line user-facing summary with a suggested next action.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            PampaxError::Config { .. } => Some("run `pampax config --validate`"),
            PampaxError::StorageNotFound { .. } => Some("run `pampax index`"),
            PampaxError::StorageCorrupted { .. } => Some("run `pampax health --components database`"),
            PampaxError::EmbedderUnavailable { .. } | PampaxError::EmbedderRateLimited { .. } => {
                Some("check OPENAI_API_KEY / OLLAMA_API_URL and retry")
            }
            PampaxError::EmbedderInvalidModel { .. } => Some("check the configured embedder model name"),
            PampaxError::FileTooLarge { .. } => Some("raise `[indexer].max_file_bytes` or exclude the file"),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            PampaxError::Config { .. } => "config",
            PampaxError::StorageNotFound { .. } => "storage_not_found",
            PampaxError::StorageCorrupted { .. } => "storage_corrupted",
            PampaxError::StorageBusy { .. } => "storage_busy",
            PampaxError::StorageReadOnly { .. } => "storage_read_only",
            PampaxError::FileTooLarge { .. } => "file_too_large",
            PampaxError::EmbedderUnavailable { .. } => "embedder_unavailable",
            PampaxError::EmbedderRateLimited { .. } => "embedder_rate_limited",
            PampaxError::EmbedderInvalidModel { .. } => "embedder_invalid_model",
            PampaxError::Reranker { .. } => "reranker",
            PampaxError::Cancelled => "cancelled",
            PampaxError::Timeout { .. } => "timeout",
            PampaxError::Internal { .. } => "internal",
        }
    }
}

impl From<rusqlite::Error> for PampaxError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => {
                PampaxError::StorageNotFound { message: e.to_string() }
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                PampaxError::StorageBusy { message: e.to_string() }
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DatabaseCorrupt =>
            {
                PampaxError::StorageCorrupted { message: e.to_string() }
            }
            other => PampaxError::Internal { message: other.to_string() },
        }
    }
}

impl From<std::io::Error> for PampaxError {
    fn from(e: std::io::Error) -> Self {
        PampaxError::Internal { message: e.to_string() }
    }
}
