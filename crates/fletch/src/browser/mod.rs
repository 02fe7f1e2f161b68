//! Headless-browser namespace
//!
//! [`Browser`] mirrors the HTTP extractors (`html`, `json`, `script`,
//! `jsonld`) but loads pages through a browser engine, so client-side
//! rendering and XHR traffic are visible. The engine is launched on first use,
//! reused by every later call and shut down by [`Browser::close`].

#[cfg(feature = "chrome")]
mod chrome;

#[cfg(feature = "chrome")]
pub use chrome::ChromeLauncher;

use crate::cache::{Cache, CacheParams, Format};
use crate::error::FetchError;
use crate::extract::{jsonld::parse_jsonld, script};
use crate::options::{ProxyConfig, RequestOptions};
use crate::sandbox::ScriptSandbox;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use regex::Regex;
use scraper::Html;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

/// Resource types aborted when the options do not say otherwise
pub const DEFAULT_BLOCKED_RESOURCE_TYPES: [&str; 4] = ["stylesheet", "image", "font", "media"];

/// Selects the network response captured by [`Browser::json`]
#[derive(Debug, Clone)]
pub enum RequestMatcher {
    /// URL must be equal
    Exact(String),
    /// URL must match the pattern
    Pattern(Regex),
}

impl RequestMatcher {
    /// Match one URL exactly
    pub fn exact(url: impl Into<String>) -> Self {
        RequestMatcher::Exact(url.into())
    }

    /// Match URLs against a regular expression
    pub fn pattern(pattern: &str) -> Result<Self, FetchError> {
        Regex::new(pattern)
            .map(RequestMatcher::Pattern)
            .map_err(|e| FetchError::Configuration(format!("fletch.browser: {}", e)))
    }

    /// Whether `url` is selected
    pub fn matches(&self, url: &str) -> bool {
        match self {
            RequestMatcher::Exact(expected) => expected == url,
            RequestMatcher::Pattern(re) => re.is_match(url),
        }
    }

    /// Stable text form, used in cache keys
    pub fn key(&self) -> String {
        match self {
            RequestMatcher::Exact(url) => url.clone(),
            RequestMatcher::Pattern(re) => format!("/{}/", re.as_str()),
        }
    }
}

impl From<&str> for RequestMatcher {
    fn from(url: &str) -> Self {
        RequestMatcher::exact(url)
    }
}

impl From<String> for RequestMatcher {
    fn from(url: String) -> Self {
        RequestMatcher::Exact(url)
    }
}

impl From<Regex> for RequestMatcher {
    fn from(re: Regex) -> Self {
        RequestMatcher::Pattern(re)
    }
}

/// How the engine is started
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Connect to a running browser instead of launching one
    pub endpoint: Option<String>,
    /// Proxy for all browser traffic
    pub proxy: Option<ProxyConfig>,
}

/// Per-page settings
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Page to load
    pub url: String,
    /// User-Agent override
    pub user_agent: Option<String>,
    /// Lower-cased resource types to abort
    pub blocked_resource_types: Vec<String>,
    /// Selector that must be present before content is read
    pub wait_for_selector: Option<String>,
    /// Where to save a screenshot after navigation
    pub screenshot: Option<PathBuf>,
    /// Proxy basic-auth credentials
    pub proxy_credentials: Option<(String, String)>,
}

impl PageRequest {
    fn from_options(url: &str, options: &RequestOptions) -> Self {
        let browser = options.browser.clone().unwrap_or_default();
        let blocked_resource_types = browser
            .blocked_resource_types
            .unwrap_or_else(|| {
                DEFAULT_BLOCKED_RESOURCE_TYPES
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            })
            .into_iter()
            .map(|s| s.to_ascii_lowercase())
            .collect();
        Self {
            url: url.to_string(),
            user_agent: options.user_agent.clone(),
            blocked_resource_types,
            wait_for_selector: browser.wait_for_selector,
            screenshot: browser.screenshot,
            proxy_credentials: options
                .proxy
                .as_ref()
                .and_then(|p| p.basic_auth())
                .map(|(u, p)| (u.to_string(), p.to_string())),
        }
    }

    /// Whether requests of `resource_type` are aborted
    pub fn blocks(&self, resource_type: &str) -> bool {
        let resource_type = resource_type.to_ascii_lowercase();
        self.blocked_resource_types.contains(&resource_type)
    }
}

/// Starts browser engines
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser or connect to `options.endpoint`
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn BrowserEngine>, FetchError>;
}

/// A running browser
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Load a page and return its rendered HTML
    async fn content(&self, page: &PageRequest) -> Result<String, FetchError>;

    /// Load a page and return the body of the first response selected by
    /// `matcher`
    async fn capture(&self, page: &PageRequest, matcher: &RequestMatcher)
        -> Result<String, FetchError>;

    /// Shut the browser down
    async fn close(&self) -> Result<(), FetchError>;
}

/// Launcher used when no browser engine is compiled in
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLauncher;

#[async_trait]
impl BrowserLauncher for UnavailableLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Arc<dyn BrowserEngine>, FetchError> {
        Err(FetchError::Browser(
            "no browser engine available, enable the `chrome` feature".to_string(),
        ))
    }
}

/// Launcher for the compiled-in engine
pub fn default_launcher() -> Arc<dyn BrowserLauncher> {
    #[cfg(feature = "chrome")]
    {
        Arc::new(ChromeLauncher::new())
    }
    #[cfg(not(feature = "chrome"))]
    {
        Arc::new(UnavailableLauncher)
    }
}

/// A network response seen by the page
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedResponse<I> {
    /// Response URL
    pub url: String,
    /// Engine-specific request handle
    pub id: I,
}

/// Resolve with the first response whose URL is selected by `matcher`
///
/// Later responses are ignored. The receiver errors if the stream ends first.
pub fn first_matching<S, I>(
    responses: S,
    matcher: RequestMatcher,
) -> oneshot::Receiver<ObservedResponse<I>>
where
    S: Stream<Item = ObservedResponse<I>> + Send + 'static,
    I: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut responses = Box::pin(responses);
        while let Some(response) = responses.next().await {
            if matcher.matches(&response.url) {
                debug!(url = %response.url, "Captured matching response");
                let _ = tx.send(response);
                return;
            }
        }
    });
    rx
}

type EngineSlot = Arc<Mutex<Option<Arc<dyn BrowserEngine>>>>;

/// Browser-backed extractors
///
/// Browsers derived with [`Browser::derive`] share the engine and the cache.
pub struct Browser {
    defaults: RequestOptions,
    cache: Arc<Cache>,
    sandbox: Arc<dyn ScriptSandbox>,
    launcher: Arc<dyn BrowserLauncher>,
    engine: EngineSlot,
}

impl fmt::Debug for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Browser")
            .field("defaults", &self.defaults)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Browser {
    pub(crate) fn new(
        defaults: RequestOptions,
        sandbox: Arc<dyn ScriptSandbox>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            defaults,
            cache: Arc::new(Cache::new()),
            sandbox,
            launcher,
            engine: Arc::new(Mutex::new(None)),
        }
    }

    /// Browser with other defaults over the same engine and cache
    pub(crate) fn derive(&self, defaults: RequestOptions) -> Self {
        Self {
            defaults,
            cache: self.cache.clone(),
            sandbox: self.sandbox.clone(),
            launcher: self.launcher.clone(),
            engine: self.engine.clone(),
        }
    }

    /// Rendered page as a parsed document
    pub async fn html(&self, url: &str, options: &RequestOptions) -> Result<Html, FetchError> {
        let options = self.defaults.merge(options);
        let source = self.html_source(url, &options).await?;
        Ok(Html::parse_document(&source))
    }

    /// Body of the first response matched while `page_url` loads, as JSON
    pub async fn json<T: DeserializeOwned>(
        &self,
        page_url: &str,
        matcher: impl Into<RequestMatcher>,
        options: &RequestOptions,
    ) -> Result<T, FetchError> {
        let matcher = matcher.into();
        let options = self.defaults.merge(options);
        let matcher_key = matcher.key();
        let params = CacheParams::new(Format::Json, page_url, Some(&options))
            .with_request_url(&matcher_key);

        let value: Value = match self.cache.hit(&params) {
            Some(hit) => serde_json::from_str(&hit)
                .map_err(|e| FetchError::Parse(format!("fletch.browser.json: {}", e)))?,
            None => {
                let engine = self.engine(&options).await?;
                let page = PageRequest::from_options(page_url, &options);
                log_page(&options, page_url);
                let body = engine.capture(&page, &matcher).await?;
                let value: Value = serde_json::from_str(&body)
                    .map_err(|e| FetchError::Parse(format!("fletch.browser.json: {}", e)))?;
                self.cache.write(&params, &value.to_string());
                value
            }
        };

        serde_json::from_value(value)
            .map_err(|e| FetchError::Parse(format!("fletch.browser.json: {}", e)))
    }

    /// Evaluate an inline script of the rendered page
    pub async fn script<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<T, FetchError> {
        let options = self.defaults.merge(options);
        script::require_locator(&options)?;
        let source = self.html_source(url, &options).await?;
        script::evaluate(self.sandbox.clone(), &source, &options).await
    }

    /// JSON-LD blocks of the rendered page
    pub async fn jsonld(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Vec<Value>, FetchError> {
        let options = self.defaults.merge(options);
        let source = self.html_source(url, &options).await?;
        Ok(parse_jsonld(&source))
    }

    /// Shut the engine down; a later call launches a new one
    pub async fn close(&self) -> Result<(), FetchError> {
        let engine = self.engine.lock().await.take();
        match engine {
            Some(engine) => {
                debug!("Closing browser engine");
                engine.close().await
            }
            None => Ok(()),
        }
    }

    /// Whether an engine is currently running
    pub async fn is_running(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    async fn html_source(&self, url: &str, options: &RequestOptions) -> Result<String, FetchError> {
        let params = CacheParams::new(Format::Html, url, Some(options));
        if let Some(hit) = self.cache.hit(&params) {
            return Ok(hit);
        }

        let engine = self.engine(options).await?;
        let page = PageRequest::from_options(url, options);
        log_page(options, url);
        let source = engine.content(&page).await?;
        self.cache.write(&params, &source);
        Ok(source)
    }

    async fn engine(&self, options: &RequestOptions) -> Result<Arc<dyn BrowserEngine>, FetchError> {
        let mut slot = self.engine.lock().await;
        if let Some(engine) = slot.as_ref() {
            return Ok(engine.clone());
        }

        let launch = LaunchOptions {
            endpoint: options.browser.as_ref().and_then(|b| b.endpoint.clone()),
            proxy: options.proxy.clone(),
        };
        debug!(endpoint = ?launch.endpoint, "Starting browser engine");
        let engine = self.launcher.launch(&launch).await?;
        *slot = Some(engine.clone());
        Ok(engine)
    }
}

fn log_page(options: &RequestOptions, url: &str) {
    if options.log.unwrap_or(false) {
        info!(url = %url, "Loading page in browser");
    } else {
        debug!(url = %url, "Loading page in browser");
    }
}
