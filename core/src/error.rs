//! Error types for the tracker core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database busy after {attempts} attempts")]
    Busy { attempts: u32 },

    #[error("schema version {found} is newer than this build supports ({supported})")]
    SchemaMismatch { found: i64, supported: i64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Transient errors are retried inside the write path; everything else
    /// escalates per the error taxonomy.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Busy { .. } => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("cloud sync is not configured")]
    Disabled,

    #[error("retryable cloud failure: {0}")]
    Retryable(String),

    #[error("rate limited by remote")]
    RateLimited,

    #[error("rejected by remote: {0}")]
    Rejected(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CloudError {
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 {
            Self::RateLimited
        } else if status.is_server_error() {
            Self::Retryable(format!("{status}: {body}"))
        } else {
            Self::Rejected(format!("{status}: {body}"))
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::RateLimited)
    }
}

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("log source unavailable: {0}")]
    SourceUnavailable(String),
}
