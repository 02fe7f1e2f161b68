//! Default HTTP transport
//!
//! Executes a [`TransportRequest`] with reqwest: method, headers, body,
//! proxy, redirect limit, TLS verification, timeout and response encoding.

use crate::error::FetchError;
use crate::normalize::TransportRequest;
use crate::options::Method;
use crate::transport::{rejected_status_text, RawResponse, Transport};
use crate::DEFAULT_USER_AGENT;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// reqwest-backed transport
///
/// A client is built per request because proxy, redirect and TLS settings
/// are per-request options.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    user_agent: String,
}

impl HttpTransport {
    /// Create a transport with the default User-Agent
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// User-Agent sent when the request does not set one
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn build_client(&self, request: &TransportRequest) -> Result<reqwest::Client, FetchError> {
        let redirect_policy = if request.max_redirections == 0 {
            redirect::Policy::none()
        } else {
            redirect::Policy::limited(request.max_redirections)
        };

        // Proxied requests skip certificate checks unless told otherwise
        let verify_tls = request
            .reject_unauthorized
            .unwrap_or(request.proxy.is_none());

        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(request.timeout)
            .redirect(redirect_policy)
            .danger_accept_invalid_certs(!verify_tls);

        if let Some(proxy) = &request.proxy {
            let mut reqwest_proxy =
                reqwest::Proxy::all(proxy.url()).map_err(FetchError::ClientBuild)?;
            if let Some((username, password)) = proxy.basic_auth() {
                reqwest_proxy = reqwest_proxy.basic_auth(username, password);
            }
            builder = builder.proxy(reqwest_proxy);
        }

        builder.build().map_err(FetchError::ClientBuild)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn perform(&self, request: &TransportRequest) -> Result<RawResponse, FetchError> {
        let url = request.url.as_str();
        debug!(transport = self.name(), method = %request.method, url = %url, "Sending request");

        let client = self.build_client(request)?;
        let mut http_request = client
            .request(reqwest_method(request.method), request.url.clone())
            .headers(to_header_map(&request.headers));
        if let Some(body) = &request.body {
            http_request = http_request.body(body.clone());
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, url))?;

        let status = response.status();
        let headers = response.headers().clone();
        let status_text = if request.accepts(status.as_u16()) {
            status.canonical_reason().unwrap_or_default().to_string()
        } else {
            rejected_status_text(status.as_u16(), url)
        };

        let body = response
            .text_with_charset(&request.encoding)
            .await
            .map_err(|e| FetchError::from_reqwest(e, url))?;

        debug!(url = %url, status = status.as_u16(), size = body.len(), "Response received");
        Ok(RawResponse::new(status.as_u16(), status_text, headers, body))
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

/// Convert request headers, skipping names or values reqwest rejects
fn to_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid header"),
        }
    }
    map
}
