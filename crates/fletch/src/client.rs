//! Client and request orchestration
//!
//! [`Client::fetch`] runs the pipeline every extractor is built on:
//! merge defaults, normalize, wait for the configured delay, then call the
//! transport under the retry policy. Extractors put the response cache in
//! front of that pipeline and reshape the body.

use crate::browser::{default_launcher, Browser, BrowserLauncher};
use crate::cache::{Cache, CacheParams, Format};
use crate::config::ClientConfig;
use crate::error::FetchError;
use crate::extract::{embedded_json, jsonld::parse_jsonld, script, text_to_json, CookieJar};
use crate::normalize::{normalize, Normalized};
use crate::options::RequestOptions;
use crate::retry::{retry, RetryError};
use crate::sandbox::{BoaSandbox, ScriptSandbox};
use crate::transport::{HttpTransport, RawResponse, Transport};
use reqwest::header::HeaderMap;
use scraper::Html;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builder for configuring a [`Client`]
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    config: ClientConfig,
    defaults: RequestOptions,
    sandbox: Option<Arc<dyn ScriptSandbox>>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    cache: Option<Arc<Cache>>,
    browser: Option<Browser>,
}

impl ClientBuilder {
    /// Create a builder with production defaults
    pub fn new() -> Self {
        Self {
            transport: None,
            config: ClientConfig::default(),
            defaults: RequestOptions::default(),
            sandbox: None,
            launcher: None,
            cache: None,
            browser: None,
        }
    }

    /// Use a custom transport
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set client-wide defaults
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Test mode: no initial delay and fast retries
    pub fn testing(self) -> Self {
        self.config(ClientConfig::testing())
    }

    /// Options merged under every call's options
    pub fn defaults(mut self, defaults: RequestOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Use a custom script sandbox
    pub fn sandbox(mut self, sandbox: impl ScriptSandbox + 'static) -> Self {
        self.sandbox = Some(Arc::new(sandbox));
        self
    }

    /// Use a custom browser launcher
    pub fn browser_launcher(mut self, launcher: impl BrowserLauncher + 'static) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    /// Share a response cache with other clients
    pub fn cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the client
    pub fn build(self) -> Client {
        let sandbox = self
            .sandbox
            .unwrap_or_else(|| Arc::new(BoaSandbox::new()));
        let launcher = self.launcher.unwrap_or_else(default_launcher);
        let browser = match self.browser {
            Some(browser) => browser,
            None => Browser::new(self.defaults.clone(), sandbox.clone(), launcher.clone()),
        };

        Client {
            inner: Arc::new(ClientInner {
                transport: self
                    .transport
                    .unwrap_or_else(|| Arc::new(HttpTransport::new())),
                config: self.config,
                defaults: self.defaults,
                cache: self.cache.unwrap_or_default(),
                sandbox,
                launcher,
                browser,
            }),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP client with retries, caching and extractors
///
/// Cloning is cheap; clones share the cache and the browser engine.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    defaults: RequestOptions,
    cache: Arc<Cache>,
    sandbox: Arc<dyn ScriptSandbox>,
    launcher: Arc<dyn BrowserLauncher>,
    browser: Browser,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.inner.transport.name())
            .field("config", &self.inner.config)
            .field("defaults", &self.inner.defaults)
            .field("cache_entries", &self.inner.cache.len())
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        ClientBuilder::new().build()
    }
}

impl Client {
    /// Create a client with production defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client-wide defaults
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Options merged under every call
    pub fn defaults(&self) -> &RequestOptions {
        &self.inner.defaults
    }

    /// Response cache
    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    /// Headless-browser extractors
    pub fn browser(&self) -> &Browser {
        &self.inner.browser
    }

    /// Derive a client whose defaults are `defaults` merged over this
    /// client's defaults
    ///
    /// The derived client shares the transport, config, sandbox, cache and
    /// browser engine.
    pub fn create(&self, defaults: RequestOptions) -> Client {
        let defaults = self.inner.defaults.merge(&defaults);
        ClientBuilder {
            transport: Some(self.inner.transport.clone()),
            config: self.inner.config.clone(),
            browser: Some(self.inner.browser.derive(defaults.clone())),
            defaults,
            sandbox: Some(self.inner.sandbox.clone()),
            launcher: Some(self.inner.launcher.clone()),
            cache: Some(self.inner.cache.clone()),
        }
        .build()
    }

    /// Perform the request and return the raw response
    pub async fn fetch(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<RawResponse, FetchError> {
        let options = self.inner.defaults.merge(options);
        self.execute(url, &options).await
    }

    /// Response body as text
    pub async fn text(&self, url: &str, options: &RequestOptions) -> Result<String, FetchError> {
        let options = self.inner.defaults.merge(options);
        self.cached_text(Format::Text, url, &options).await
    }

    /// Response body as a parsed HTML document
    pub async fn html(&self, url: &str, options: &RequestOptions) -> Result<Html, FetchError> {
        let options = self.inner.defaults.merge(options);
        let source = self.cached_text(Format::Html, url, &options).await?;
        Ok(Html::parse_document(&source))
    }

    /// Response body as JSON
    ///
    /// A body that is not valid JSON is returned as a JSON string.
    pub async fn json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<T, FetchError> {
        let options = self.inner.defaults.merge(options);
        let params = CacheParams::new(Format::Json, url, Some(&options));

        let value = match self.inner.cache.hit(&params) {
            Some(hit) => text_to_json(&hit),
            None => {
                let body = self.execute(url, &options).await?.into_text();
                let value = text_to_json(&body);
                self.inner.cache.write(&params, &value.to_string());
                value
            }
        };

        serde_json::from_value(value).map_err(|e| FetchError::Parse(format!("fletch.json: {}", e)))
    }

    /// Globals left behind by an inline script of the page
    ///
    /// Requires `script_path` or `script_find_fn`; without either the call
    /// fails before any request is made.
    pub async fn script<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<T, FetchError> {
        let options = self.inner.defaults.merge(options);
        script::require_locator(&options)?;
        let source = self.cached_text(Format::Html, url, &options).await?;
        script::evaluate(self.inner.sandbox.clone(), &source, &options).await
    }

    /// JSON-LD blocks of the page; malformed blocks become `{}`
    pub async fn jsonld(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Vec<Value>, FetchError> {
        let options = self.inner.defaults.merge(options);
        let source = self.cached_text(Format::Html, url, &options).await?;
        Ok(parse_jsonld(&source))
    }

    /// JSON held by the element matching `embedded_json_selector`
    pub async fn embedded_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<T, FetchError> {
        let options = self.inner.defaults.merge(options);
        let selector = embedded_json::require_selector(&options)?;
        let source = self.cached_text(Format::Html, url, &options).await?;
        embedded_json::parse_embedded_json(&source, selector)
    }

    /// Response headers; never cached
    pub async fn headers(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HeaderMap, FetchError> {
        Ok(self.fetch(url, options).await?.headers)
    }

    /// Cookies set by the response; never cached
    pub async fn cookies(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<CookieJar, FetchError> {
        let response = self.fetch(url, options).await?;
        let mut jar = CookieJar::new();
        jar.set_cookies(response.set_cookies());
        Ok(jar)
    }

    async fn cached_text(
        &self,
        format: Format,
        url: &str,
        options: &RequestOptions,
    ) -> Result<String, FetchError> {
        let params = CacheParams::new(format, url, Some(options));
        if let Some(hit) = self.inner.cache.hit(&params) {
            return Ok(hit);
        }

        let text = self.execute(url, options).await?.into_text();
        self.inner.cache.write(&params, &text);
        Ok(text)
    }

    /// Orchestrate one logical request with already merged options
    async fn execute(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<RawResponse, FetchError> {
        let Normalized {
            request,
            delay,
            retry: policy,
            log,
            ..
        } = normalize(url, options, &self.inner.config)?;

        if log {
            info!(url = %request.url, method = %request.method, "Fetching");
        } else {
            debug!(url = %request.url, method = %request.method, "Fetching");
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let transport = self.inner.transport.as_ref();
        let request = &request;
        let policy_ref = &policy;

        retry(&policy, |attempt| async move {
            let failure = match transport.perform(request).await {
                Ok(response) if request.accepts(response.status) => return Ok(response),
                Ok(response) => {
                    let status = response.status;
                    let err = FetchError::Status {
                        status,
                        message: response.status_text,
                    };
                    if policy_ref.aborts_on(status) {
                        RetryError::Abort(err)
                    } else {
                        RetryError::Transient(err)
                    }
                }
                Err(err) if err.is_transient() => RetryError::Transient(err),
                Err(err) => RetryError::Abort(err),
            };

            let err = match &failure {
                RetryError::Transient(err) | RetryError::Abort(err) => err,
            };
            if log {
                warn!(url = %request.url, attempt, error = %err, "Request failed");
            } else {
                debug!(url = %request.url, attempt, error = %err, "Request failed");
            }
            Err(failure)
        })
        .await
    }
}
