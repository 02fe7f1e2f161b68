//! Inline `<script>` location

use crate::error::FetchError;
use crate::extract::element_source;
use crate::options::RequestOptions;
use crate::sandbox::ScriptSandbox;
use scraper::{Html, Selector};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

const MISSING_LOCATOR: &str = "fletch.script: scriptPath or scriptFindFn are required";
const NOT_FOUND: &str = "fletch.script: script element not found";

/// Fail fast when neither `script_path` nor `script_find_fn` is set
pub fn require_locator(options: &RequestOptions) -> Result<(), FetchError> {
    if options.script_path.is_none() && options.script_find_fn.is_none() {
        return Err(FetchError::Configuration(MISSING_LOCATOR.to_string()));
    }
    Ok(())
}

/// Source of the first script matched by the options' locator
///
/// `script_path` takes precedence over `script_find_fn`.
pub fn find_script(html: &str, options: &RequestOptions) -> Result<String, FetchError> {
    require_locator(options)?;
    let document = Html::parse_document(html);

    let found = if let Some(path) = &options.script_path {
        let selector = parse_selector(path)?;
        document.select(&selector).next().map(|el| element_source(&el))
    } else if let Some(predicate) = &options.script_find_fn {
        let scripts = parse_selector("script")?;
        document
            .select(&scripts)
            .find(|el| predicate(el))
            .map(|el| element_source(&el))
    } else {
        None
    };

    found.ok_or_else(|| FetchError::NotFound(NOT_FOUND.to_string()))
}

/// Locate the script in `html`, run it in `sandbox` and deserialize the
/// resulting globals
///
/// An empty script yields the seed bindings (or an empty object).
pub(crate) async fn evaluate<T: DeserializeOwned>(
    sandbox: Arc<dyn ScriptSandbox>,
    html: &str,
    options: &RequestOptions,
) -> Result<T, FetchError> {
    let source = find_script(html, options)?;
    let seed = options.script_sandbox.clone().unwrap_or_default();

    let bindings = if source.trim().is_empty() {
        seed
    } else {
        tokio::task::spawn_blocking(move || sandbox.evaluate(&source, &seed))
            .await
            .map_err(|e| FetchError::Script(format!("fletch.script: {}", e)))??
    };

    serde_json::from_value(Value::Object(bindings))
        .map_err(|e| FetchError::Parse(format!("fletch.script: {}", e)))
}

fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector)
        .map_err(|e| FetchError::Configuration(format!("fletch.script: invalid selector: {}", e)))
}
