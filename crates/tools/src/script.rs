//! Execute an in-page script and normalize its payload.
//!
//! In-page scripts are opaque strings. Each one is written as a JavaScript
//! function taking a single JSON argument and returning a JSON-serializable
//! object; the shape of that object is the only contract:
//!
//! - `{ available: false, ... }`: the library the script inspects is absent
//! - `{ error: "...", ... }`: the script ran but the lookup failed
//! - anything else: success, returned as `data`

use cdp::{CdpClient, CdpError, EvaluateOptions};
use serde_json::Value;

use crate::result::ToolResult;

/// Helpers visible to every script as `__mcp`.
///
/// `__mcp.safe(value, depth)` clones a value into plain JSON, cutting cycles,
/// functions, DOM nodes and anything deeper than `depth`.
const PRELUDE: &str = r#"const __mcp = {
  safe(value, depth = 4, seen = new WeakSet()) {
    if (value === null || value === undefined) return value ?? null;
    const t = typeof value;
    if (t === 'string') return value.length > 2000 ? value.slice(0, 2000) + '…' : value;
    if (t === 'number' || t === 'boolean') return value;
    if (t === 'bigint') return value.toString();
    if (t === 'function') return '[Function ' + (value.name || 'anonymous') + ']';
    if (t === 'symbol') return value.toString();
    if (typeof Node !== 'undefined' && value instanceof Node) return '[' + value.nodeName + ']';
    if (seen.has(value)) return '[Circular]';
    if (depth <= 0) return Array.isArray(value) ? '[Array(' + value.length + ')]' : '[Object]';
    seen.add(value);
    if (Array.isArray(value)) return value.slice(0, 100).map(v => __mcp.safe(v, depth - 1, seen));
    if (value instanceof Map) return Object.fromEntries(Array.from(value.entries()).slice(0, 100).map(([k, v]) => [String(k), __mcp.safe(v, depth - 1, seen)]));
    if (value instanceof Set) return Array.from(value).slice(0, 100).map(v => __mcp.safe(v, depth - 1, seen));
    if (value instanceof Date) return value.toISOString();
    if (value instanceof Error) return { name: value.name, message: value.message };
    const out = {};
    for (const key of Object.keys(value).slice(0, 200)) {
      try { out[key] = __mcp.safe(value[key], depth - 1, seen); } catch (e) { out[key] = '[Unreadable]'; }
    }
    return out;
  },
  at(obj, path) {
    if (!path) return { found: true, value: obj };
    let cur = obj;
    for (const part of String(path).split('.')) {
      if (cur === null || cur === undefined || !(part in Object(cur))) return { found: false };
      cur = cur[part];
    }
    return { found: true, value: cur };
  }
};"#;

/// Wrap a function expression and its argument into one evaluatable
/// expression: `(function(){ <prelude>; return (<function>)(<args>); })()`.
pub fn call(function: &str, args: &Value) -> String {
    format!(
        "(function() {{\n{}\nreturn ({})({});\n}})()",
        PRELUDE, function, args
    )
}

/// One script run: what to evaluate and how to read the answer.
pub struct Script<'a> {
    expression: String,
    options: EvaluateOptions,
    context: Option<&'a str>,
    library: Option<&'a str>,
}

impl<'a> Script<'a> {
    /// Evaluate `expression` verbatim.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            options: EvaluateOptions::default(),
            context: None,
            library: None,
        }
    }

    /// Evaluate `function` applied to `args`, with the shared prelude.
    pub fn function(function: &str, args: &Value) -> Self {
        Self::new(call(function, args))
    }

    /// Prefix for browser-reported errors, e.g. "Error listing machines".
    pub fn context(mut self, context: &'a str) -> Self {
        self.context = Some(context);
        self
    }

    /// Treat `{available: false}` as "<library> not available in the page".
    pub fn library(mut self, library: &'a str) -> Self {
        self.library = Some(library);
        self
    }

    /// Wait for a returned promise to settle.
    pub fn awaiting(mut self) -> Self {
        self.options.await_promise = true;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.options.timeout_ms = Some(timeout_ms);
        self
    }

    /// Evaluate and return the raw payload, for tools that interpret it
    /// themselves.
    pub async fn payload(self, client: &CdpClient, session_id: &str) -> Result<Value, CdpError> {
        client
            .evaluate_value(&self.expression, self.options, Some(session_id))
            .await
    }

    /// Evaluate and normalize into a `ToolResult`.
    pub async fn run(self, client: &CdpClient, session_id: &str) -> ToolResult {
        let context = self.context;
        let library = self.library;
        match self.payload(client, session_id).await {
            Ok(payload) => normalize(payload, library),
            Err(e) => ToolResult::from_cdp_error_in(context, &e),
        }
    }
}

/// Map a script payload onto the uniform result.
pub fn normalize(payload: Value, library: Option<&str>) -> ToolResult {
    if let Some(library) = library {
        if payload.get("available") == Some(&Value::Bool(false)) {
            return ToolResult::error(format!("{} not available in the page", library));
        }
    }

    match payload.get("error") {
        Some(error) if !error.is_null() && error != &Value::Bool(false) => {
            let message = error_text(error);
            ToolResult::error_with_data(message, payload)
        }
        _ => ToolResult::ok(payload),
    }
}

/// Best human-readable string for a script-reported `error` field.
fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) if !s.trim().is_empty() => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .map(String::from)
            .unwrap_or_else(|| error.to_string()),
        Value::Bool(true) | Value::String(_) => "Script reported an error".to_string(),
        other => other.to_string(),
    }
}
