//! Inline script evaluation
//!
//! Page scripts are run in a fresh JavaScript global scope and the resulting
//! global bindings are handed back as JSON. The scope has no DOM, no network
//! and no timers; scripts that touch `window` or `document` fail.

use crate::error::FetchError;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsString, JsValue, Source};
use serde_json::{Map, Value};

/// Default cap on loop iterations per evaluation
pub const DEFAULT_LOOP_LIMIT: u64 = 1_000_000;

/// Collects every enumerable, non-function global as one JSON document
const COLLECT_BINDINGS: &str = r#"(function () {
  var out = {};
  Object.keys(globalThis).forEach(function (key) {
    var value = globalThis[key];
    if (typeof value !== "function") out[key] = value;
  });
  return JSON.stringify(out);
})()"#;

/// Evaluates script source in an isolated scope
pub trait ScriptSandbox: Send + Sync {
    /// Run `source` with `seed` pre-defined as globals and return the globals
    /// afterwards
    fn evaluate(&self, source: &str, seed: &Map<String, Value>)
        -> Result<Map<String, Value>, FetchError>;
}

/// [`ScriptSandbox`] backed by the boa engine
#[derive(Debug, Clone)]
pub struct BoaSandbox {
    loop_limit: u64,
}

impl BoaSandbox {
    /// Create a sandbox with the default loop limit
    pub fn new() -> Self {
        Self {
            loop_limit: DEFAULT_LOOP_LIMIT,
        }
    }

    /// Cap loop iterations so runaway scripts fail instead of hanging
    pub fn with_loop_limit(mut self, limit: u64) -> Self {
        self.loop_limit = limit;
        self
    }
}

impl Default for BoaSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptSandbox for BoaSandbox {
    fn evaluate(
        &self,
        source: &str,
        seed: &Map<String, Value>,
    ) -> Result<Map<String, Value>, FetchError> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(self.loop_limit);

        for (name, value) in seed {
            let js_value = JsValue::from_json(value, &mut context).map_err(script_error)?;
            context
                .register_global_property(JsString::from(name.as_str()), js_value, Attribute::all())
                .map_err(script_error)?;
        }

        context
            .eval(Source::from_bytes(source))
            .map_err(script_error)?;

        let collected = context
            .eval(Source::from_bytes(COLLECT_BINDINGS))
            .map_err(script_error)?;
        let json = collected
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .ok_or_else(|| {
                FetchError::Script("fletch.script: bindings are not serializable".into())
            })?;

        match serde_json::from_str(&json) {
            Ok(Value::Object(bindings)) => Ok(bindings),
            Ok(_) => Ok(Map::new()),
            Err(e) => Err(FetchError::Script(format!("fletch.script: {}", e))),
        }
    }
}

fn script_error(err: boa_engine::JsError) -> FetchError {
    FetchError::Script(format!("fletch.script: {}", err))
}
