use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("search blocked: {reason}")]
    Blocked { reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search returned status {status}")]
    Server { status: u16 },

    #[error("invalid search URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl VerifyError {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }

    /// Transient failures worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Blocked { .. } => true,
            Self::Http(e) => !e.is_builder(),
            Self::Server { status } => *status >= 500,
            Self::InvalidUrl { .. } => false,
        }
    }
}
