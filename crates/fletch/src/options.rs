//! User-facing request options
//!
//! [`RequestOptions`] is sparse: every field is optional and only the fields a
//! caller sets take part in normalization. Options from a bound client and a
//! per-call override are combined with [`RequestOptions::merge`].

use crate::cache::CacheMethods;
use crate::retry::RetryPolicy;
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether a response status is acceptable
pub type StatusValidator = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// Predicate selecting the inline script to evaluate
pub type ScriptPredicate = Arc<dyn Fn(&ElementRef<'_>) -> bool + Send + Sync>;

/// HTTP method for the request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// HTTP GET request
    #[default]
    Get,
    /// HTTP HEAD request
    Head,
    /// HTTP POST request
    Post,
    /// HTTP PUT request
    Put,
    /// HTTP PATCH request
    Patch,
    /// HTTP DELETE request
    Delete,
    /// HTTP OPTIONS request
    Options,
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(format!("Invalid method: {}", other)),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        };
        f.write_str(name)
    }
}

/// Proxy the request is routed through
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Basic-auth user; auth is only sent when both user and password are set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Basic-auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Proxy scheme, `http` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl ProxyConfig {
    /// Create a proxy config for host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set basic-auth credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the proxy scheme
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Proxy URL without credentials, e.g. `http://127.0.0.1:8080`
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.protocol.as_deref().unwrap_or("http"),
            self.host,
            self.port
        )
    }

    /// Credentials, only when both parts are present
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    fn merge(&self, other: &ProxyConfig) -> ProxyConfig {
        ProxyConfig {
            host: if other.host.is_empty() {
                self.host.clone()
            } else {
                other.host.clone()
            },
            port: if other.port == 0 { self.port } else { other.port },
            username: other.username.clone().or_else(|| self.username.clone()),
            password: other.password.clone().or_else(|| self.password.clone()),
            protocol: other.protocol.clone().or_else(|| self.protocol.clone()),
        }
    }
}

/// Options for the headless-browser transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserOptions {
    /// WebSocket endpoint of an already running browser
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Resource types to abort; `None` blocks stylesheets, images, fonts and media
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_resource_types: Option<Vec<String>>,
    /// Selector to wait for before reading the page content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,
    /// Save a full-page PNG screenshot here once the page has loaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

impl BrowserOptions {
    fn merge(&self, other: &BrowserOptions) -> BrowserOptions {
        BrowserOptions {
            endpoint: other.endpoint.clone().or_else(|| self.endpoint.clone()),
            blocked_resource_types: other
                .blocked_resource_types
                .clone()
                .or_else(|| self.blocked_resource_types.clone()),
            wait_for_selector: other
                .wait_for_selector
                .clone()
                .or_else(|| self.wait_for_selector.clone()),
            screenshot: other.screenshot.clone().or_else(|| self.screenshot.clone()),
        }
    }
}

/// Retry setting as given by the caller
#[derive(Debug, Clone)]
pub enum RetryOption {
    /// Exactly one attempt
    Disabled,
    /// Number of extra attempts, other policy fields from the defaults
    Count(u32),
    /// Policy used verbatim
    Policy(RetryPolicy),
}

impl From<u32> for RetryOption {
    fn from(retries: u32) -> Self {
        RetryOption::Count(retries)
    }
}

impl From<RetryPolicy> for RetryOption {
    fn from(policy: RetryPolicy) -> Self {
        RetryOption::Policy(policy)
    }
}

/// Options for a single fetch call
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Wait before the first attempt
    pub delay: Option<Duration>,
    /// Request headers, names are lower-cased
    pub headers: BTreeMap<String, String>,
    /// HTTP method
    pub method: Option<Method>,
    /// Url-encoded form body
    pub form_data: Option<Map<String, Value>>,
    /// Url-encoded form body
    pub form_url_encoded: Option<Map<String, Value>>,
    /// JSON body
    pub json_data: Option<Value>,
    /// Proxy to route through
    pub proxy: Option<ProxyConfig>,
    /// Retry policy
    pub retry: Option<RetryOption>,
    /// Memoize the response text
    pub cache: Option<bool>,
    /// Replacement query string; `null` values are dropped
    pub url_search_params: BTreeMap<String, Value>,
    /// Verify TLS certificates
    pub reject_unauthorized: Option<bool>,
    /// Response timeout
    pub timeout: Option<Duration>,
    /// Response encoding label, e.g. `utf8` or `latin1`
    pub encoding: Option<String>,
    /// Redirect limit, 0 disables following redirects
    pub max_redirections: Option<usize>,
    /// Custom status validator
    pub validate_status: Option<StatusValidator>,
    /// Custom cache storage hooks
    pub cache_methods: Option<CacheMethods>,
    /// CSS selector of the inline script to evaluate
    pub script_path: Option<String>,
    /// Predicate over `<script>` elements, used when `script_path` is unset
    pub script_find_fn: Option<ScriptPredicate>,
    /// Seed bindings for the script sandbox
    pub script_sandbox: Option<Map<String, Value>>,
    /// CSS selector of the element holding embedded JSON
    pub embedded_json_selector: Option<String>,
    /// User-Agent override
    pub user_agent: Option<String>,
    /// Log the URL and failures at info/warn level
    pub log: Option<bool>,
    /// Headless-browser settings
    pub browser: Option<BrowserOptions>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("delay", &self.delay)
            .field("headers", &self.headers)
            .field("method", &self.method)
            .field("form_data", &self.form_data)
            .field("form_url_encoded", &self.form_url_encoded)
            .field("json_data", &self.json_data)
            .field("proxy", &self.proxy)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .field("url_search_params", &self.url_search_params)
            .field("timeout", &self.timeout)
            .field("encoding", &self.encoding)
            .field("max_redirections", &self.max_redirections)
            .field("validate_status", &self.validate_status.is_some())
            .field("cache_methods", &self.cache_methods.is_some())
            .field("script_path", &self.script_path)
            .field("script_find_fn", &self.script_find_fn.is_some())
            .field("embedded_json_selector", &self.embedded_json_selector)
            .field("user_agent", &self.user_agent)
            .field("log", &self.log)
            .field("browser", &self.browser)
            .finish_non_exhaustive()
    }
}

impl RequestOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait before the first attempt
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set a header, replacing any previous value
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Set several headers
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self = self.header(name, value);
        }
        self
    }

    /// Set the HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Send a url-encoded form
    pub fn form_data<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.form_data = Some(to_map(fields));
        self
    }

    /// Send a url-encoded form
    pub fn form_url_encoded<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.form_url_encoded = Some(to_map(fields));
        self
    }

    /// Send a JSON body
    pub fn json_data(mut self, data: impl Into<Value>) -> Self {
        self.json_data = Some(data.into());
        self
    }

    /// Route the request through a proxy
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: impl Into<RetryOption>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    /// Disable retries
    pub fn no_retry(mut self) -> Self {
        self.retry = Some(RetryOption::Disabled);
        self
    }

    /// Enable or disable caching
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Add a query parameter; the query string is rewritten from all parameters
    pub fn query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.url_search_params.insert(name.into(), value.into());
        self
    }

    /// Add several query parameters
    pub fn url_search_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in params {
            self = self.query(name, value);
        }
        self
    }

    /// Verify (or not) TLS certificates
    pub fn reject_unauthorized(mut self, reject: bool) -> Self {
        self.reject_unauthorized = Some(reject);
        self
    }

    /// Set the response timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the response encoding label
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Limit the number of redirects followed
    pub fn max_redirections(mut self, max: usize) -> Self {
        self.max_redirections = Some(max);
        self
    }

    /// Replace the default status validator
    pub fn validate_status<F>(mut self, validator: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        self.validate_status = Some(Arc::new(validator));
        self
    }

    /// Use custom cache storage hooks
    pub fn cache_methods(mut self, methods: CacheMethods) -> Self {
        self.cache_methods = Some(methods);
        self
    }

    /// Locate the inline script with a CSS selector
    pub fn script_path(mut self, selector: impl Into<String>) -> Self {
        self.script_path = Some(selector.into());
        self
    }

    /// Locate the inline script with a predicate
    pub fn script_find_fn<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ElementRef<'_>) -> bool + Send + Sync + 'static,
    {
        self.script_find_fn = Some(Arc::new(predicate));
        self
    }

    /// Seed the script sandbox with bindings
    pub fn script_sandbox<K, V>(mut self, bindings: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.script_sandbox = Some(to_map(bindings));
        self
    }

    /// Locate embedded JSON with a CSS selector
    pub fn embedded_json_selector(mut self, selector: impl Into<String>) -> Self {
        self.embedded_json_selector = Some(selector.into());
        self
    }

    /// Override the User-Agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Log the URL and failures at info/warn level
    pub fn log(mut self, log: bool) -> Self {
        self.log = Some(log);
        self
    }

    /// Set headless-browser options
    pub fn browser(mut self, browser: BrowserOptions) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Whether caching is enabled for this call
    pub fn cache_enabled(&self) -> bool {
        self.cache.unwrap_or(false)
    }

    /// Deep-merge `overrides` onto `self`; values in `overrides` win
    ///
    /// Maps merge per key (recursively for JSON values), proxy and browser
    /// settings merge field by field, everything else is replaced when the
    /// override sets it.
    pub fn merge(&self, overrides: &RequestOptions) -> RequestOptions {
        let mut headers = self.headers.clone();
        headers.extend(overrides.headers.clone());

        let mut url_search_params = self.url_search_params.clone();
        for (key, value) in &overrides.url_search_params {
            let merged = match url_search_params.get(key) {
                Some(base) => merge_json(base, value),
                None => value.clone(),
            };
            url_search_params.insert(key.clone(), merged);
        }

        RequestOptions {
            delay: overrides.delay.or(self.delay),
            headers,
            method: overrides.method.or(self.method),
            form_data: merge_maps(&self.form_data, &overrides.form_data),
            form_url_encoded: merge_maps(&self.form_url_encoded, &overrides.form_url_encoded),
            json_data: match (&self.json_data, &overrides.json_data) {
                (Some(base), Some(over)) => Some(merge_json(base, over)),
                (base, over) => over.clone().or_else(|| base.clone()),
            },
            proxy: match (&self.proxy, &overrides.proxy) {
                (Some(base), Some(over)) => Some(base.merge(over)),
                (base, over) => over.clone().or_else(|| base.clone()),
            },
            retry: overrides.retry.clone().or_else(|| self.retry.clone()),
            cache: overrides.cache.or(self.cache),
            url_search_params,
            reject_unauthorized: overrides.reject_unauthorized.or(self.reject_unauthorized),
            timeout: overrides.timeout.or(self.timeout),
            encoding: overrides.encoding.clone().or_else(|| self.encoding.clone()),
            max_redirections: overrides.max_redirections.or(self.max_redirections),
            validate_status: overrides
                .validate_status
                .clone()
                .or_else(|| self.validate_status.clone()),
            cache_methods: match (&self.cache_methods, &overrides.cache_methods) {
                (Some(base), Some(over)) => Some(base.merge(over)),
                (base, over) => over.clone().or_else(|| base.clone()),
            },
            script_path: overrides
                .script_path
                .clone()
                .or_else(|| self.script_path.clone()),
            script_find_fn: overrides
                .script_find_fn
                .clone()
                .or_else(|| self.script_find_fn.clone()),
            script_sandbox: merge_maps(&self.script_sandbox, &overrides.script_sandbox),
            embedded_json_selector: overrides
                .embedded_json_selector
                .clone()
                .or_else(|| self.embedded_json_selector.clone()),
            user_agent: overrides
                .user_agent
                .clone()
                .or_else(|| self.user_agent.clone()),
            log: overrides.log.or(self.log),
            browser: match (&self.browser, &overrides.browser) {
                (Some(base), Some(over)) => Some(base.merge(over)),
                (base, over) => over.clone().or_else(|| base.clone()),
            },
        }
    }
}

fn to_map<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Map<String, Value>
where
    K: Into<String>,
    V: Into<Value>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn merge_maps(
    base: &Option<Map<String, Value>>,
    over: &Option<Map<String, Value>>,
) -> Option<Map<String, Value>> {
    match (base, over) {
        (Some(base), Some(over)) => {
            let mut merged = base.clone();
            for (key, value) in over {
                let next = match merged.get(key) {
                    Some(existing) => merge_json(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Some(merged)
        }
        (base, over) => over.clone().or_else(|| base.clone()),
    }
}

/// Recursive JSON merge: objects merge per key, anything else is replaced
pub(crate) fn merge_json(base: &Value, over: &Value) -> Value {
    match (base, over) {
        (Value::Object(base), Value::Object(over)) => {
            let mut merged = base.clone();
            for (key, value) in over {
                let next = match merged.get(key) {
                    Some(existing) => merge_json(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, over) => over.clone(),
    }
}

/// String form of a parameter value; `None` for `null`
///
/// Arrays are joined with `,`, their `null` items as empty strings.
pub(crate) fn param_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(item_to_string(other)),
    }
}

fn item_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(item_to_string).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}
