//! Common error types for ValueStocks.

use thiserror::Error;

/// Top-level error type for ValueStocks operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Required configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token exchange or validation failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Remote object not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote API rejected the request.
    #[error("API error ({status}): {summary}")]
    Api {
        /// HTTP status returned by the remote service.
        status: u16,
        /// Error summary reported by the remote service.
        summary: String,
    },

    /// Remote service asked us to slow down.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transport-level failure (connect, timeout, truncated body).
    #[error("Network error: {0}")]
    Network(String),

    /// Every retry attempt failed.
    #[error("Operation failed after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        last: Box<Error>,
    },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Scraped payload did not have the expected shape.
    #[error("Scrape error: {0}")]
    Scrape(String),
}

impl Error {
    /// Whether a failed operation is worth attempting again.
    ///
    /// Transport failures, rate limiting and server-side errors are
    /// transient. Missing paths, rejected credentials and other client
    /// errors fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::RateLimited(_) => true,
            Error::Api { status, .. } => *status >= 500,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Whether this error means the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::RetryExhausted { last, .. } => last.is_not_found(),
            _ => false,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Network("reset".to_string()).is_retryable());
        assert!(Error::RateLimited("too_many_requests".to_string()).is_retryable());
        assert!(Error::Api {
            status: 503,
            summary: "unavailable".to_string()
        }
        .is_retryable());

        assert!(!Error::NotFound("/missing".to_string()).is_retryable());
        assert!(!Error::Authentication("expired".to_string()).is_retryable());
        assert!(!Error::Api {
            status: 400,
            summary: "bad path".to_string()
        }
        .is_retryable());
        assert!(!Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_retryable());
        assert!(Error::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).is_retryable());
    }

    #[test]
    fn test_not_found_through_exhaustion() {
        let err = Error::RetryExhausted {
            attempts: 3,
            last: Box::new(Error::NotFound("/a".to_string())),
        };
        assert!(err.is_not_found());
        assert!(!Error::Network("x".to_string()).is_not_found());
    }

    #[test]
    fn test_retry_exhausted_display() {
        let err = Error::RetryExhausted {
            attempts: 2,
            last: Box::new(Error::Network("timed out".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "Operation failed after 2 attempts: Network error: timed out"
        );
    }
}
