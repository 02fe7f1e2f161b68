//! Fletch - HTTP fetching with retries, memoization and content extraction
//!
//! One call turns a URL plus declarative [`RequestOptions`] into ready-to-use
//! data: text, parsed HTML, JSON, the globals of an inline script, JSON-LD
//! blocks, embedded JSON, headers or cookies.
//!
//! ## Pipeline
//!
//! Every extractor runs the same pipeline:
//!
//! 1. merge the client defaults with the per-call options
//! 2. normalize them into a [`TransportRequest`](normalize::TransportRequest)
//! 3. consult the response [`Cache`] (when `cache` is enabled)
//! 4. wait for the configured delay, then call the [`Transport`] under the
//!    [`RetryPolicy`]
//! 5. store the body and reshape it
//!
//! The free functions use a lazily built default [`Client`]. Build your own
//! with [`Client::builder`] to change the transport, the defaults or the
//! retry configuration, or derive one with [`create`].
//!
//! ```no_run
//! # async fn run() -> Result<(), fletch::FetchError> {
//! use fletch::RequestOptions;
//!
//! let page = fletch::text("https://example.com", &RequestOptions::new().cache(true)).await?;
//! let data: serde_json::Value = fletch::script(
//!     "https://example.com",
//!     &RequestOptions::new().script_path("#config"),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Browser
//!
//! [`Browser`] offers the same extractors through a headless browser. Enable
//! the `chrome` feature for the built-in Chrome engine.

pub mod browser;
pub mod cache;
pub mod client;
pub mod config;
mod error;
pub mod extract;
pub mod normalize;
pub mod options;
pub mod retry;
pub mod sandbox;
pub mod transport;

pub use browser::{Browser, BrowserEngine, BrowserLauncher, RequestMatcher};
pub use cache::{Cache, CacheMethods, CacheParams, Format};
pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use error::FetchError;
pub use extract::{Cookie, CookieJar};
pub use options::{BrowserOptions, Method, ProxyConfig, RequestOptions, RetryOption};
pub use retry::{RetryError, RetryPolicy};
pub use sandbox::{BoaSandbox, ScriptSandbox};
pub use transport::{HttpTransport, RawResponse, Transport};

use reqwest::header::HeaderMap;
use scraper::Html;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;

/// Default User-Agent string
pub const DEFAULT_USER_AGENT: &str = "Everruns Fletch/1.0";

static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();

/// Client behind the free functions
pub fn default_client() -> &'static Client {
    DEFAULT_CLIENT.get_or_init(Client::new)
}

/// Perform a request and return the raw response
pub async fn fetch(url: &str, options: &RequestOptions) -> Result<RawResponse, FetchError> {
    default_client().fetch(url, options).await
}

/// Response body as text
pub async fn text(url: &str, options: &RequestOptions) -> Result<String, FetchError> {
    default_client().text(url, options).await
}

/// Response body as a parsed HTML document
pub async fn html(url: &str, options: &RequestOptions) -> Result<Html, FetchError> {
    default_client().html(url, options).await
}

/// Response body as JSON, or a JSON string when it does not parse
pub async fn json<T: DeserializeOwned>(
    url: &str,
    options: &RequestOptions,
) -> Result<T, FetchError> {
    default_client().json(url, options).await
}

/// Globals left behind by an inline script of the page
pub async fn script<T: DeserializeOwned>(
    url: &str,
    options: &RequestOptions,
) -> Result<T, FetchError> {
    default_client().script(url, options).await
}

/// JSON-LD blocks of the page
pub async fn jsonld(url: &str, options: &RequestOptions) -> Result<Vec<Value>, FetchError> {
    default_client().jsonld(url, options).await
}

/// JSON held by the element matching `embedded_json_selector`
pub async fn embedded_json<T: DeserializeOwned>(
    url: &str,
    options: &RequestOptions,
) -> Result<T, FetchError> {
    default_client().embedded_json(url, options).await
}

/// Response headers
pub async fn headers(url: &str, options: &RequestOptions) -> Result<HeaderMap, FetchError> {
    default_client().headers(url, options).await
}

/// Cookies set by the response
pub async fn cookies(url: &str, options: &RequestOptions) -> Result<CookieJar, FetchError> {
    default_client().cookies(url, options).await
}

/// Headless-browser extractors of the default client
pub fn browser() -> &'static Browser {
    default_client().browser()
}

/// Client whose calls merge `defaults` under their own options
///
/// The new client shares the default client's cache and browser engine.
pub fn create(defaults: RequestOptions) -> Client {
    default_client().create(defaults)
}
