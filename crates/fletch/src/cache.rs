//! Response memoization keyed by request fingerprint
//!
//! A key is the md5 digest of the format tag, the URL and the canonical JSON
//! of the options that shape the response body (headers, query parameters,
//! form and JSON bodies). Object keys are sorted at every depth, so two option
//! sets with the same content always produce the same key.
//!
//! The cache stores the response text, never the parsed value. Entries live
//! as long as the owning [`Cache`]. Callers can replace any of the key, lookup
//! or store steps with [`CacheMethods`].

use crate::options::RequestOptions;
use dashmap::DashMap;
use md5::{Digest, Md5};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Custom lookup: receives the computed key
pub type CacheHitFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Custom store: receives the computed key and the payload
pub type CacheWriteFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Custom key derivation
pub type CacheKeyFn = Arc<dyn Fn(&CacheParams<'_>) -> String + Send + Sync>;

/// Shape of the cached payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Response text
    Text,
    /// HTML source
    Html,
    /// Serialized JSON
    Json,
}

impl Format {
    /// Tag used in the cache key
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Html => "html",
            Format::Json => "json",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs identifying a cacheable response
#[derive(Debug, Clone, Copy)]
pub struct CacheParams<'a> {
    /// Payload format
    pub format: Format,
    /// URL as given by the caller
    pub url: &'a str,
    /// Call options; `None` disables caching
    pub options: Option<&'a RequestOptions>,
    /// Response matcher for browser JSON capture
    pub request_url: Option<&'a str>,
}

impl<'a> CacheParams<'a> {
    /// Params for a format, URL and options
    pub fn new(format: Format, url: &'a str, options: Option<&'a RequestOptions>) -> Self {
        Self {
            format,
            url,
            options,
            request_url: None,
        }
    }

    /// Include a response matcher in the key
    pub fn with_request_url(mut self, request_url: &'a str) -> Self {
        self.request_url = Some(request_url);
        self
    }

    fn methods(&self) -> Option<&'a CacheMethods> {
        self.options.and_then(|o| o.cache_methods.as_ref())
    }

    fn enabled(&self) -> bool {
        self.options.is_some_and(|o| o.cache_enabled())
    }
}

/// Caller-supplied cache hooks; each one replaces the matching default step
#[derive(Clone, Default)]
pub struct CacheMethods {
    /// Lookup by key
    pub hit: Option<CacheHitFn>,
    /// Store by key
    pub write: Option<CacheWriteFn>,
    /// Key derivation
    pub key: Option<CacheKeyFn>,
}

impl fmt::Debug for CacheMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMethods")
            .field("hit", &self.hit.is_some())
            .field("write", &self.write.is_some())
            .field("key", &self.key.is_some())
            .finish()
    }
}

impl CacheMethods {
    /// No overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the lookup
    pub fn hit<F>(mut self, hit: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.hit = Some(Arc::new(hit));
        self
    }

    /// Replace the store
    pub fn write<F>(mut self, write: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.write = Some(Arc::new(write));
        self
    }

    /// Replace the key derivation
    pub fn key<F>(mut self, key: F) -> Self
    where
        F: Fn(&CacheParams<'_>) -> String + Send + Sync + 'static,
    {
        self.key = Some(Arc::new(key));
        self
    }

    pub(crate) fn merge(&self, other: &CacheMethods) -> CacheMethods {
        CacheMethods {
            hit: other.hit.clone().or_else(|| self.hit.clone()),
            write: other.write.clone().or_else(|| self.write.clone()),
            key: other.key.clone().or_else(|| self.key.clone()),
        }
    }
}

/// In-process response cache
#[derive(Debug, Default)]
pub struct Cache {
    store: DashMap<String, String>,
}

impl Cache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for `params`
    pub fn key(&self, params: &CacheParams<'_>) -> String {
        if let Some(key_fn) = params.methods().and_then(|m| m.key.as_ref()) {
            return key_fn(params);
        }
        fingerprint(params)
    }

    /// Cached payload, if caching is enabled and the key is present
    pub fn hit(&self, params: &CacheParams<'_>) -> Option<String> {
        if !params.enabled() {
            return None;
        }
        let key = self.key(params);
        let payload = match params.methods().and_then(|m| m.hit.as_ref()) {
            Some(hit_fn) => hit_fn(&key),
            None => self.store.get(&key).map(|entry| entry.value().clone()),
        };
        if payload.is_some() {
            debug!(format = %params.format, url = params.url, key = %key, "Cache hit");
        }
        payload
    }

    /// Store `payload` if caching is enabled
    pub fn write(&self, params: &CacheParams<'_>, payload: &str) {
        if !params.enabled() {
            return;
        }
        let key = self.key(params);
        debug!(format = %params.format, url = params.url, key = %key, "Cache write");
        match params.methods().and_then(|m| m.write.as_ref()) {
            Some(write_fn) => write_fn(&key, payload),
            None => {
                self.store.insert(key, payload.to_string());
            }
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.store.clear();
    }
}

/// Default key: md5 of format, URL and the sorted response-shaping options
pub fn fingerprint(params: &CacheParams<'_>) -> String {
    let empty = RequestOptions::default();
    let options = params.options.unwrap_or(&empty);
    // Header names as sent on the wire
    let headers: BTreeMap<String, &String> = options
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect();

    let mut shaping = json!({
        "formData": options.form_data.clone().unwrap_or_default(),
        "formUrlEncoded": options.form_url_encoded.clone().unwrap_or_default(),
        "headers": headers,
        "jsonData": options.json_data.clone().unwrap_or_else(|| Value::Object(Map::new())),
        "urlSearchParams": options.url_search_params,
    });
    if let (Some(request_url), Value::Object(map)) = (params.request_url, &mut shaping) {
        map.insert("requestUrl".to_string(), Value::String(request_url.to_string()));
    }

    let seed = format!(
        "{}{}{}",
        params.format,
        params.url,
        sort_value(&shaping)
    );
    hex::encode(Md5::digest(seed.as_bytes()))
}

/// Sort object keys at every depth; arrays keep their order
pub fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_value(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}
