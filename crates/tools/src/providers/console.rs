//! Console capture.

use cdp::protocol::exception_summary;
use cdp::{CdpClient, CdpEvent};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::capture::{Captures, EntryMapper};
use crate::cleanup::forget_closed_sessions;
use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::result::ToolResult;

const METHODS: &[&str] = &["Runtime.consoleAPICalled", "Runtime.exceptionThrown"];

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetLogsArgs {
    /// log, info, warning, error, debug ...
    #[serde(default)]
    pub level: Option<String>,
    /// Substring the message must contain
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "super::default_limit")]
    pub limit: usize,
    /// Empty the buffer after reading
    #[serde(default)]
    pub clear: bool,
}

pub struct ConsoleProvider {
    tools: Vec<RegisteredTool>,
}

impl ConsoleProvider {
    pub fn new(client: Arc<CdpClient>, capacity: usize) -> Self {
        let captures = Arc::new(Captures::new("console", capacity));
        forget_closed_sessions(&client, &captures);
        let (start, get, stop) = (captures.clone(), captures.clone(), captures);

        let tools = ToolSet::new(client)
            .add(
                "console_start_capture",
                "Start buffering console messages and uncaught exceptions",
                move |client, _args: NoArgs, session| {
                    let captures = start.clone();
                    async move {
                        if let Err(e) = client.enable_runtime(Some(&session)).await {
                            return ToolResult::from_cdp_error_in(Some("Error starting console capture"), &e);
                        }
                        let mapper: EntryMapper = Arc::new(console_entry);
                        if captures.start(&client, &session, METHODS, mapper) {
                            ToolResult::ok(captures.status(&session))
                        } else {
                            ToolResult::ok(captures.status(&session))
                                .with_warning("Console capture was already running")
                        }
                    }
                },
            )
            .add(
                "console_get_logs",
                "Read captured console messages",
                move |_client, args: GetLogsArgs, session| {
                    let captures = get.clone();
                    async move {
                        let Some(buffer) = captures.buffer(&session) else {
                            return ToolResult::error(
                                "Console capture is not running. Call console_start_capture first.",
                            );
                        };
                        let search = args.search.as_deref();
                        let level = args.level.as_deref();
                        let logs = buffer.recent(args.limit, |entry| {
                            level.map_or(true, |l| entry["level"] == l)
                                && search.map_or(true, |s| {
                                    entry["text"].as_str().is_some_and(|t| t.contains(s))
                                })
                        });
                        let status = captures.status(&session);
                        if args.clear {
                            buffer.clear();
                        }
                        ToolResult::ok(json!({ "count": logs.len(), "logs": logs, "capture": status }))
                    }
                },
            )
            .add(
                "console_stop_capture",
                "Stop capturing console messages and drop the buffer",
                move |client, _args: NoArgs, session| {
                    let captures = stop.clone();
                    async move {
                        match captures.stop(&client, &session) {
                            Some(dropped) => ToolResult::ok(json!({ "stopped": true, "discarded": dropped })),
                            None => ToolResult::error("Console capture is not running"),
                        }
                    }
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(ConsoleProvider, "console");

fn console_entry(event: &CdpEvent) -> Option<Value> {
    let params = &event.params;
    match event.method.as_str() {
        "Runtime.consoleAPICalled" => {
            let text = params["args"]
                .as_array()
                .map(|args| args.iter().map(remote_text).collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            let frame = &params["stackTrace"]["callFrames"][0];
            Some(json!({
                "level": params["type"].as_str().unwrap_or("log"),
                "text": text,
                "timestamp": params["timestamp"],
                "url": frame["url"],
                "line": frame["lineNumber"],
            }))
        }
        "Runtime.exceptionThrown" => {
            let details = &params["exceptionDetails"];
            Some(json!({
                "level": "error",
                "text": exception_summary(details),
                "timestamp": params["timestamp"],
                "url": details["url"],
                "line": details["lineNumber"],
                "exception": true,
            }))
        }
        _ => None,
    }
}

/// Printable text for one console argument.
fn remote_text(arg: &Value) -> String {
    match &arg["value"] {
        Value::String(s) => s.clone(),
        Value::Null => arg["description"]
            .as_str()
            .or_else(|| arg["unserializableValue"].as_str())
            .or_else(|| arg["type"].as_str())
            .unwrap_or_default()
            .to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_entry_joins_arguments() {
        let event = CdpEvent::new(
            "Runtime.consoleAPICalled",
            json!({
                "type": "warning",
                "timestamp": 1.5,
                "args": [
                    { "type": "string", "value": "count" },
                    { "type": "number", "value": 3 },
                    { "type": "object", "description": "Object" },
                    { "type": "undefined" }
                ],
                "stackTrace": { "callFrames": [{ "url": "app.js", "lineNumber": 10 }] }
            }),
            Some("S1".into()),
        );
        let entry = console_entry(&event).unwrap();
        assert_eq!(entry["level"], "warning");
        assert_eq!(entry["text"], "count 3 Object undefined");
        assert_eq!(entry["url"], "app.js");
    }

    #[test]
    fn test_exception_entry() {
        let event = CdpEvent::new(
            "Runtime.exceptionThrown",
            json!({
                "timestamp": 2.0,
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": { "description": "TypeError: x is undefined\n    at app.js:1" }
                }
            }),
            None,
        );
        let entry = console_entry(&event).unwrap();
        assert_eq!(entry["level"], "error");
        assert_eq!(entry["text"], "TypeError: x is undefined");
    }
}
