//! JSON-LD blocks

use crate::extract::element_source;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

/// Every `<script type="application/ld+json">` block, in document order
///
/// Newlines are replaced by spaces before parsing. A block that still fails
/// to parse yields an empty object.
pub fn parse_jsonld(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    document
        .select(&selector)
        .map(|el| {
            let source = element_source(&el).replace('\n', " ");
            serde_json::from_str(&source).unwrap_or_else(|e| {
                debug!(error = %e, "Skipping malformed JSON-LD block");
                Value::Object(Map::new())
            })
        })
        .collect()
}
