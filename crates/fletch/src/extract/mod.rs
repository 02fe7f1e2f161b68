//! Content extraction from response bodies
//!
//! Everything here is synchronous and works on the response text, so parsed
//! documents never live across an await point.

pub mod cookies;
pub mod embedded_json;
pub mod jsonld;
pub mod script;

pub use cookies::{Cookie, CookieJar};

use scraper::ElementRef;
use serde_json::Value;

/// Parse `text` as JSON, falling back to a JSON string holding the raw text
pub fn text_to_json(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Raw text content of an element; script bodies are not entity-decoded
pub(crate) fn element_source(element: &ElementRef<'_>) -> String {
    element.text().collect()
}
