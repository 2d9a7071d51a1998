use std::sync::Arc;

/// Failures surfaced by the fetch pipeline.
///
/// Cloneable so a single outcome can be handed to every caller that joined
/// the same in-flight request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status} from {url}")]
    Http {
        status: u16,
        url: String,
        body: Arc<Vec<u8>>,
    },
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
}

impl FetchError {
    /// HTTP status attached to the failure, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Default retry classification.
    ///
    /// A received response is judged by its status alone: 5xx, 429 and 408
    /// retry, everything else is terminal. Without a response, timeouts and
    /// network failures retry.
    pub fn is_retryable(&self) -> bool {
        if let Some(status) = self.status() {
            return is_retryable_status(status);
        }
        matches!(self, FetchError::Timeout { .. } | FetchError::Network(_))
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429 || status == 408
}

/// Failures of the durable cache backend. Never surfaced past
/// [`crate::cache::PersistentCache`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("storage lock poisoned")]
    Poisoned,
    #[error("corrupted record for key {0}")]
    Corrupted(String),
}

/// Failures loading or validating [`crate::Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Figment(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> FetchError {
        FetchError::Http {
            status,
            url: "https://example.com".to_string(),
            body: Arc::new(vec![]),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(http(status).is_retryable(), "{} should retry", status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        for status in [400, 401, 403, 404, 422] {
            assert!(!http(status).is_retryable(), "{} should not retry", status);
        }
    }

    #[test]
    fn test_transport_failures_retry() {
        assert!(FetchError::Network("connection reset".to_string()).is_retryable());
        assert!(FetchError::Timeout {
            url: "https://example.com".to_string(),
            timeout_ms: 10
        }
        .is_retryable());
        assert!(!FetchError::Decode("eof".to_string()).is_retryable());
    }
}
