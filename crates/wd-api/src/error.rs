//! Error types for the REST adapter.

use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors from the tracking backend's REST API.
///
/// All of these are transient from the sync engine's point of view: a
/// failed roster fetch leaves the previous roster intact and the next
/// periodic reload retries.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}")]
    Status { status: u16 },

    #[error("authentication refused (status {status})")]
    Unauthorized { status: u16 },

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("backend refused the request: {message}")]
    Rejected { message: String },

    #[error("auth token is not a valid header value")]
    InvalidToken,
}

impl ApiError {
    /// Collapses reqwest's transport failures into the two cases the
    /// caller's retry policy distinguishes.
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_connect() {
            ApiError::Connect(err.to_string())
        } else {
            ApiError::Http(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(ApiError::Timeout.to_string(), "request timed out");
        assert_eq!(
            ApiError::Status { status: 503 }.to_string(),
            "unexpected status 503"
        );
        assert_eq!(
            ApiError::Rejected {
                message: "smtp relay down".to_string()
            }
            .to_string(),
            "backend refused the request: smtp relay down"
        );
    }
}
