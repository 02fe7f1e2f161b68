//! Transport layer
//!
//! Design: the orchestrator never talks to the network directly. It hands a
//! fully resolved [`TransportRequest`] to a [`Transport`] and receives a
//! [`RawResponse`]. [`HttpTransport`] is the reqwest-backed default; tests and
//! callers can plug in their own.

mod http;

pub use http::HttpTransport;

use crate::error::FetchError;
use crate::normalize::TransportRequest;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, SET_COOKIE};

/// Executes one HTTP exchange
///
/// Implementations must not retry; retries are driven by the caller. When the
/// request's validator rejects the response status, implementations should
/// still return `Ok` and put the requested URL into `status_text` so the
/// resulting error is traceable.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier for logging
    fn name(&self) -> &'static str;

    /// Perform the request
    ///
    /// Connection, DNS, TLS and body failures are returned as
    /// [`FetchError::Transport`].
    async fn perform(&self, request: &TransportRequest) -> Result<RawResponse, FetchError>;
}

/// Response as returned by a transport
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Status text; carries the URL when the status was rejected
    pub status_text: String,
    /// Response headers
    pub headers: HeaderMap,
    body: String,
}

impl RawResponse {
    /// Create a response
    pub fn new(
        status: u16,
        status_text: impl Into<String>,
        headers: HeaderMap,
        body: impl Into<String>,
    ) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers,
            body: body.into(),
        }
    }

    /// Decoded body text
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Take the decoded body text
    pub fn into_text(self) -> String {
        self.body
    }

    /// First value of a header, if it is valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every `set-cookie` header value
    pub fn set_cookies(&self) -> Vec<&str> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }
}

/// Status text for a status rejected by the validator
pub fn rejected_status_text(status: u16, url: &str) -> String {
    format!("Request failed with status code {} - {}", status, url)
}
