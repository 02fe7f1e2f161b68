//! JSON embedded in an element, e.g. `<script id="__NEXT_DATA__">`

use crate::error::FetchError;
use crate::extract::element_source;
use crate::options::RequestOptions;
use scraper::{Html, Selector};
use serde::de::DeserializeOwned;

const MISSING_SELECTOR: &str = "fletch.embeddedJson: embeddedJsonSelector is required";

/// The options' `embedded_json_selector`, or a configuration error
pub fn require_selector(options: &RequestOptions) -> Result<&str, FetchError> {
    options
        .embedded_json_selector
        .as_deref()
        .ok_or_else(|| FetchError::Configuration(MISSING_SELECTOR.to_string()))
}

/// Strictly parse the text of the first element matching `selector`
pub fn parse_embedded_json<T: DeserializeOwned>(
    html: &str,
    selector: &str,
) -> Result<T, FetchError> {
    let selector = Selector::parse(selector).map_err(|e| {
        FetchError::Configuration(format!("fletch.embeddedJson: invalid selector: {}", e))
    })?;

    let document = Html::parse_document(html);
    let source = document
        .select(&selector)
        .next()
        .map(|el| element_source(&el))
        .ok_or_else(|| {
            FetchError::NotFound("fletch.embeddedJson: script element not found".into())
        })?;

    serde_json::from_str(&source)
        .map_err(|e| FetchError::Parse(format!("fletch.embeddedJson: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::{json, Value};

    const PAGE: &str = r#"<html><body>
        <script id="__NEXT_DATA__" type="application/json">{"props": {"page": 3}}</script>
        <script id="broken" type="application/json">{"props": </script>
    </body></html>"#;

    #[derive(Debug, Deserialize, PartialEq)]
    struct NextData {
        props: Props,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Props {
        page: u32,
    }

    #[test]
    fn test_typed() {
        let data: NextData = parse_embedded_json(PAGE, "#__NEXT_DATA__").unwrap();
        assert_eq!(data.props.page, 3);
    }

    #[test]
    fn test_untyped() {
        let data: Value = parse_embedded_json(PAGE, "script#__NEXT_DATA__").unwrap();
        assert_eq!(data, json!({"props": {"page": 3}}));
    }

    #[test]
    fn test_require_selector() {
        let err = require_selector(&RequestOptions::new()).unwrap_err();
        assert!(matches!(err, FetchError::Configuration(_)));
        assert_eq!(err.to_string(), MISSING_SELECTOR);

        let options = RequestOptions::new().embedded_json_selector("#__NEXT_DATA__");
        assert_eq!(require_selector(&options).unwrap(), "#__NEXT_DATA__");
    }

    #[test]
    fn test_errors() {
        let err = parse_embedded_json::<Value>(PAGE, "#missing").unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));

        let err = parse_embedded_json::<Value>(PAGE, "#broken").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
        assert!(err.to_string().starts_with("fletch.embeddedJson: "));
    }
}
