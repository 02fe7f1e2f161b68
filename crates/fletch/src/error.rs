//! Error types for fletch

use thiserror::Error;

/// Errors that can occur during fetch and extraction operations
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A required option is missing
    #[error("{0}")]
    Configuration(String),

    /// Selector or predicate matched no element
    #[error("{0}")]
    NotFound(String),

    /// Strict JSON parsing failed
    #[error("{0}")]
    Parse(String),

    /// Inline script evaluation failed
    #[error("{0}")]
    Script(String),

    /// Failed to build HTTP client
    #[error("Failed to create HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    /// Connection, DNS, TLS or body read failure
    #[error("{0}")]
    Transport(String),

    /// Response status rejected by the status validator
    #[error("{status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Status text, including the requested URL
        message: String,
    },

    /// Headless browser failure
    #[error("Browser error: {0}")]
    Browser(String),
}

impl FetchError {
    /// Create a transport error from a reqwest error, tagged with the URL
    pub fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        let reason = if err.is_timeout() {
            "Request timed out".to_string()
        } else if err.is_connect() {
            "Failed to connect to server".to_string()
        } else {
            err.to_string()
        };
        FetchError::Transport(format!("{} - {}", reason, url))
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Status { .. })
    }
}
