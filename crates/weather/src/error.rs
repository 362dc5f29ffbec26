use std::time::Duration;

use thiserror::Error;

/// Failures talking to the weather provider.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("provider request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Whether the failure was the request running out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) => true,
            UpstreamError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}
