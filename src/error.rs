//! Error taxonomy for the freshness engine.
//!
//! Library operations return [`Result`]. Errors raised while regenerating a
//! single item inside a batch are recovered locally by the batch processor;
//! errors from explicit single-item calls are surfaced to the caller.

use thiserror::Error as ThisError;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a [`MetadataFetcher`](crate::fetcher::MetadataFetcher).
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
    #[error("timed out fetching {url} after {secs}s")]
    Timeout { url: String, secs: u64 },
    #[error("source {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not parse response from {url}: {message}")]
    Parse { url: String, message: String },
}

impl FetchError {
    /// HTTP status to record on the freshness record for this failure.
    ///
    /// Network failures and timeouts have no status; parse failures mean the
    /// source answered, so they are recorded as a plain 200.
    pub fn source_status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Parse { .. } => Some(200),
            FetchError::Network { .. } | FetchError::Timeout { .. } => None,
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Parse { .. } => false,
        }
    }
}

/// Store-integrity violations. Both are retryable by the caller.
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("version {version} already exists for item {item_id}")]
    DuplicateVersion { item_id: String, version: i64 },
    #[error("queue item {queue_id} is no longer {expected}")]
    ClaimConflict { queue_id: String, expected: String },
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    SourceFetch(#[from] FetchError),
    #[error("store error: {0}")]
    Store(String),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Returns `true` if retrying the same call later might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Integrity(_) => true,
            Error::SourceFetch(e) => e.is_transient(),
            Error::Store(_) => true,
            Error::NotFound { .. } | Error::Validation(_) => false,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(format!("invalid stored json: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_status_classification() {
        let not_found = FetchError::Status {
            url: "https://a".into(),
            status: 404,
        };
        assert_eq!(not_found.source_status(), Some(404));
        assert!(!not_found.is_transient());

        let unavailable = FetchError::Status {
            url: "https://a".into(),
            status: 503,
        };
        assert!(unavailable.is_transient());

        let timeout = FetchError::Timeout {
            url: "https://a".into(),
            secs: 10,
        };
        assert_eq!(timeout.source_status(), None);
        assert!(Error::from(timeout).is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!Error::validation("bad").is_retryable());
        assert!(!Error::not_found("item", "x").is_retryable());
        let dup = IntegrityError::DuplicateVersion {
            item_id: "x".into(),
            version: 2,
        };
        assert!(Error::from(dup).is_retryable());
    }
}
