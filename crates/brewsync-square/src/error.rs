use thiserror::Error;

/// Errors from Square API calls.
#[derive(Debug, Error)]
pub enum SquareError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
}

impl SquareError {
    /// Rate limits, server errors and network failures. Nothing is retried
    /// within a run; these just clear up by the next one.
    pub fn is_retryable(&self) -> bool {
        match self {
            SquareError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            SquareError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SquareError::Decode { .. } => false,
        }
    }
}

pub type SquareResult<T> = Result<T, SquareError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> SquareError {
        SquareError::Http {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_classification() {
        assert!(http(429).is_retryable());
        assert!(http(503).is_retryable());
        assert!(!http(401).is_retryable());
    }
}
