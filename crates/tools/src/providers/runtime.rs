//! Raw JavaScript evaluation and library detection.

use cdp::{CdpClient, EvaluateOptions};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::provider::{RegisteredTool, ToolSet};
use crate::result::ToolResult;
use crate::script::Script;

const CHECK_LIBRARY: &str = r#"(args) => {
  const probes = {
    react: () => (window.__REACT_DEVTOOLS_GLOBAL_HOOK__ && window.__REACT_DEVTOOLS_GLOBAL_HOOK__.renderers && window.__REACT_DEVTOOLS_GLOBAL_HOOK__.renderers.size > 0)
      ? { version: (Array.from(window.__REACT_DEVTOOLS_GLOBAL_HOOK__.renderers.values())[0] || {}).version || null }
      : (window.React ? { version: window.React.version || null } : null),
    redux: () => [window.__REDUX_STORE__, window.store].some(s => s && typeof s.dispatch === 'function' && typeof s.getState === 'function')
      || window.__REDUX_DEVTOOLS_EXTENSION__ ? {} : null,
    apollo: () => window.__APOLLO_CLIENT__ ? { version: window.__APOLLO_CLIENT__.version || null } : null,
    xstate: () => (window.__xstate__ || window.__XSTATE_MACHINES__) ? {} : null,
    zustand: () => window.__ZUSTAND_STORES__ ? { stores: Object.keys(window.__ZUSTAND_STORES__) } : null,
    vue: () => (window.__VUE__ || window.Vue) ? { version: (window.Vue && window.Vue.version) || null } : null,
    angular: () => window.ng || document.querySelector('[ng-version]')
      ? { version: (document.querySelector('[ng-version]') || { getAttribute: () => null }).getAttribute('ng-version') } : null,
    jquery: () => window.jQuery ? { version: window.jQuery.fn && window.jQuery.fn.jquery } : null
  };
  const names = args.library ? [args.library.toLowerCase()] : Object.keys(probes);
  const results = {};
  for (const name of names) {
    const probe = probes[name];
    if (!probe) return { error: 'Unknown library: ' + args.library, known: Object.keys(probes) };
    let found = null;
    try { found = probe(); } catch (e) { found = null; }
    results[name] = found ? Object.assign({ available: true }, found) : { available: false };
  }
  return args.library ? Object.assign({ library: names[0] }, results[names[0]]) : { libraries: results };
}"#;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArgs {
    /// JavaScript expression to evaluate in the page
    pub expression: String,
    /// Await a returned promise
    #[serde(default)]
    pub await_promise: bool,
    /// Return a JSON value instead of an object reference
    #[serde(default = "super::default_true")]
    pub return_by_value: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckLibraryArgs {
    /// react, redux, apollo, xstate, zustand, vue, angular or jquery; all when omitted
    #[serde(default)]
    pub library: Option<String>,
}

pub struct RuntimeProvider {
    tools: Vec<RegisteredTool>,
}

impl RuntimeProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "runtime_evaluate",
                "Evaluate a JavaScript expression in the page",
                |client, args: EvaluateArgs, session| async move {
                    let options = EvaluateOptions {
                        return_by_value: args.return_by_value,
                        await_promise: args.await_promise,
                        timeout_ms: args.timeout_ms,
                        ..EvaluateOptions::default()
                    };
                    match client.evaluate(&args.expression, options, Some(&session)).await {
                        Ok(result) => ToolResult::ok(remote_object_summary(&result["result"])),
                        Err(e) => ToolResult::from_cdp_error_in(Some("Error evaluating expression"), &e),
                    }
                },
            )
            .add(
                "runtime_check_library",
                "Check which frontend libraries the page has loaded",
                |client, args: CheckLibraryArgs, session| async move {
                    Script::function(CHECK_LIBRARY, &json!({ "library": args.library }))
                        .context("Error checking libraries")
                        .run(&client, &session)
                        .await
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(RuntimeProvider, "runtime");

/// Flatten a RemoteObject into what an agent needs to read it.
pub(crate) fn remote_object_summary(object: &Value) -> Value {
    let mut summary = json!({ "type": object["type"] });
    for key in ["subtype", "className", "description", "objectId", "unserializableValue"] {
        if let Some(v) = object.get(key) {
            summary[key] = v.clone();
        }
    }
    if let Some(value) = object.get("value") {
        summary["value"] = value.clone();
    } else if object["type"] == "undefined" {
        summary["value"] = Value::Null;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_object_summary() {
        let summary = remote_object_summary(&json!({ "type": "number", "value": 42, "description": "42" }));
        assert_eq!(summary, json!({ "type": "number", "value": 42, "description": "42" }));

        let summary = remote_object_summary(&json!({ "type": "undefined" }));
        assert_eq!(summary, json!({ "type": "undefined", "value": null }));

        let summary = remote_object_summary(&json!({
            "type": "object", "subtype": "node", "className": "HTMLDivElement", "objectId": "1.2"
        }));
        assert_eq!(summary["objectId"], "1.2");
        assert!(summary.get("value").is_none());
    }
}
