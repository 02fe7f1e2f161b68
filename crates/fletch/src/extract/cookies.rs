//! Cookie jar built from `set-cookie` headers

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A cookie reduced to its name and value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub key: String,
    /// Cookie value
    pub value: String,
    /// `key=value` form ready for a `cookie` request header
    pub serialized: String,
}

impl Cookie {
    /// Create a cookie from name and value
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let serialized = cookie::Cookie::new(key.as_str(), value.as_str()).to_string();
        Self {
            key,
            value,
            serialized,
        }
    }

    /// Parse a `set-cookie` header value; attributes are dropped
    pub fn parse(header: &str) -> Option<Self> {
        match cookie::Cookie::parse(header) {
            Ok(parsed) => Some(Self::new(parsed.name(), parsed.value())),
            Err(e) => {
                debug!(error = %e, "Ignoring malformed set-cookie header");
                None
            }
        }
    }
}

/// Ordered collection of cookies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    /// Create an empty jar
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one cookie; malformed header values are ignored
    pub fn set_cookie(&mut self, cookie: impl Into<CookieInput>) {
        let parsed = match cookie.into() {
            CookieInput::Header(header) => Cookie::parse(&header),
            CookieInput::Cookie(cookie) => Some(cookie),
        };
        if let Some(cookie) = parsed {
            self.cookies.push(cookie);
        }
    }

    /// Add several cookies
    pub fn set_cookies<I, C>(&mut self, cookies: I)
    where
        I: IntoIterator<Item = C>,
        C: Into<CookieInput>,
    {
        for cookie in cookies {
            self.set_cookie(cookie);
        }
    }

    /// Value for a `cookie` request header: `a=1; b=2`
    pub fn cookie_string(&self) -> String {
        self.cookies
            .iter()
            .map(|c| c.serialized.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Cookies in insertion order
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Number of cookies
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Whether the jar is empty
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// Either a raw `set-cookie` value or an already parsed cookie
#[derive(Debug, Clone)]
pub enum CookieInput {
    /// Raw header value
    Header(String),
    /// Parsed cookie
    Cookie(Cookie),
}

impl From<&str> for CookieInput {
    fn from(header: &str) -> Self {
        CookieInput::Header(header.to_string())
    }
}

impl From<String> for CookieInput {
    fn from(header: String) -> Self {
        CookieInput::Header(header)
    }
}

impl From<Cookie> for CookieInput {
    fn from(cookie: Cookie) -> Self {
        CookieInput::Cookie(cookie)
    }
}
