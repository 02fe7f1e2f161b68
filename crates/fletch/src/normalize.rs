//! Option normalization
//!
//! Turns sparse [`RequestOptions`] into the fully resolved [`TransportRequest`]
//! the transport executes, plus the orchestration settings (delay, retry,
//! cache, log). Options are applied in a fixed order:
//!
//! 1. body (`form_data`, then `form_url_encoded`, then `json_data`; the first
//!    one set wins)
//! 2. `headers`
//! 3. `user_agent`
//! 4. `method`
//! 5. `url_search_params`
//! 6. `proxy`, `reject_unauthorized`, `timeout`, `max_redirections`, `encoding`
//! 7. `validate_status`
//! 8. `retry`
//! 9. `delay`, `cache`, `log`

use crate::config::{ClientConfig, DEFAULT_ENCODING, DEFAULT_MAX_REDIRECTIONS};
use crate::error::FetchError;
use crate::options::{
    param_to_string, Method, ProxyConfig, RequestOptions, RetryOption, StatusValidator,
};
use crate::retry::RetryPolicy;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Fully resolved request, executed as-is by a transport
#[derive(Clone)]
pub struct TransportRequest {
    /// Absolute URL
    pub url: Url,
    /// HTTP method
    pub method: Method,
    /// Request headers, lower-cased names
    pub headers: BTreeMap<String, String>,
    /// Request body
    pub body: Option<String>,
    /// Proxy to route through
    pub proxy: Option<ProxyConfig>,
    /// TLS verification override
    pub reject_unauthorized: Option<bool>,
    /// Response timeout
    pub timeout: Duration,
    /// Redirect limit, 0 disables following
    pub max_redirections: usize,
    /// Status validator
    pub validate_status: StatusValidator,
    /// Response encoding label
    pub encoding: String,
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("proxy", &self.proxy)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("timeout", &self.timeout)
            .field("max_redirections", &self.max_redirections)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl TransportRequest {
    /// Whether `status` passes the validator
    pub fn accepts(&self, status: u16) -> bool {
        (self.validate_status)(status)
    }
}

/// Normalized request plus orchestration settings
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Request handed to the transport on every attempt
    pub request: TransportRequest,
    /// Wait before the first attempt
    pub delay: Duration,
    /// Retry policy
    pub retry: RetryPolicy,
    /// Whether caching is enabled
    pub cache: bool,
    /// Whether to log at info/warn level
    pub log: bool,
}

/// Accept `200 <= status < 400`
pub fn default_status_validator() -> StatusValidator {
    Arc::new(|status| (200..400).contains(&status))
}

/// Resolve `options` against `url` and the client defaults
pub fn normalize(
    url: &str,
    options: &RequestOptions,
    config: &ClientConfig,
) -> Result<Normalized, FetchError> {
    let mut url = parse_url(url)?;

    let mut method = Method::Get;
    let mut headers = BTreeMap::new();
    headers.insert("referer".to_string(), url.origin().ascii_serialization());
    let mut body = None;

    // 1. body
    if let Some(fields) = options
        .form_data
        .as_ref()
        .or(options.form_url_encoded.as_ref())
    {
        method = Method::Post;
        headers.insert("content-type".to_string(), FORM_CONTENT_TYPE.to_string());
        body = Some(encode_form(fields));
    } else if let Some(data) = &options.json_data {
        method = Method::Post;
        headers.insert("content-type".to_string(), JSON_CONTENT_TYPE.to_string());
        body = Some(data.to_string());
    }

    // 2. headers
    for (name, value) in &options.headers {
        headers.insert(name.to_ascii_lowercase(), value.clone());
    }

    // 3. user agent
    if let Some(user_agent) = &options.user_agent {
        headers.insert("user-agent".to_string(), user_agent.clone());
    }

    // 4. method
    if let Some(explicit) = options.method {
        method = explicit;
    }

    // 5. query string
    if !options.url_search_params.is_empty() {
        url.set_query(None);
        let pairs: Vec<(&String, String)> = options
            .url_search_params
            .iter()
            .filter_map(|(k, v)| param_to_string(v).map(|v| (k, v)))
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
    }

    // 7. status validator
    let validate_status = options
        .validate_status
        .clone()
        .unwrap_or_else(default_status_validator);

    // 8. retry
    let retry = match &options.retry {
        None => config.default_retry.clone(),
        Some(RetryOption::Disabled) => config.default_retry.clone().with_retries(0),
        Some(RetryOption::Count(n)) => config.default_retry.clone().with_retries(*n),
        Some(RetryOption::Policy(policy)) => policy.clone(),
    };

    let request = TransportRequest {
        url,
        method,
        headers,
        body,
        // 6. transport scalars
        proxy: options.proxy.clone(),
        reject_unauthorized: options.reject_unauthorized,
        timeout: options.timeout.unwrap_or(config.default_timeout),
        max_redirections: options.max_redirections.unwrap_or(DEFAULT_MAX_REDIRECTIONS),
        validate_status,
        encoding: options
            .encoding
            .clone()
            .unwrap_or_else(|| DEFAULT_ENCODING.to_string()),
    };

    // 9. orchestration scalars
    Ok(Normalized {
        request,
        delay: options.delay.unwrap_or(config.default_delay),
        retry,
        cache: options.cache_enabled(),
        log: options.log.unwrap_or(false),
    })
}

/// Parse and validate an http(s) URL; special characters are percent-encoded
pub fn parse_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{} - {}", e, url)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(FetchError::InvalidUrl(format!(
            "must start with http:// or https:// - {}",
            url
        ))),
    }
}

/// `k=v&...` form encoding; `null` values are dropped
fn encode_form(fields: &Map<String, Value>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in fields {
        if let Some(value) = param_to_string(value) {
            serializer.append_pair(name, &value);
        }
    }
    serializer.finish()
}
