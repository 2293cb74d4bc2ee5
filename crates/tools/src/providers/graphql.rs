//! GraphQL operation capture.
//!
//! Watches outgoing requests and keeps the ones whose body is a GraphQL
//! payload: `{query, operationName, variables}`, a batch array of those, or
//! a persisted-query body carrying only `operationName` and `extensions`.

use cdp::{CdpClient, CdpEvent};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::capture::{Captures, EntryMapper};
use crate::cleanup::forget_closed_sessions;
use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::result::ToolResult;

const METHODS: &[&str] = &["Network.requestWillBeSent"];

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetOperationsArgs {
    /// Only operations with this name
    #[serde(default)]
    pub operation_name: Option<String>,
    /// query, mutation or subscription
    #[serde(default)]
    pub operation_type: Option<String>,
    #[serde(default = "super::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub clear: bool,
}

pub struct GraphqlProvider {
    tools: Vec<RegisteredTool>,
}

impl GraphqlProvider {
    pub fn new(client: Arc<CdpClient>, capacity: usize) -> Self {
        let captures = Arc::new(Captures::new("graphql", capacity));
        forget_closed_sessions(&client, &captures);
        let (start, get, stop) = (captures.clone(), captures.clone(), captures);

        let tools = ToolSet::new(client)
            .add(
                "graphql_start_capture",
                "Start recording GraphQL operations sent by the page",
                move |client, _args: NoArgs, session| {
                    let captures = start.clone();
                    async move {
                        if let Err(e) = client.ensure_domain(Some(&session), "Network").await {
                            return ToolResult::from_cdp_error_in(Some("Error starting GraphQL capture"), &e);
                        }
                        let mapper: EntryMapper = Arc::new(graphql_entry);
                        if captures.start(&client, &session, METHODS, mapper) {
                            ToolResult::ok(captures.status(&session))
                        } else {
                            ToolResult::ok(captures.status(&session))
                                .with_warning("GraphQL capture was already running")
                        }
                    }
                },
            )
            .add(
                "graphql_get_operations",
                "Read captured GraphQL operations",
                move |_client, args: GetOperationsArgs, session| {
                    let captures = get.clone();
                    async move {
                        let Some(buffer) = captures.buffer(&session) else {
                            return ToolResult::error(
                                "GraphQL capture is not running. Call graphql_start_capture first.",
                            );
                        };
                        let operations = buffer.recent(args.limit, |entry| {
                            args.operation_name
                                .as_deref()
                                .map_or(true, |name| entry["operationName"] == name)
                                && args
                                    .operation_type
                                    .as_deref()
                                    .map_or(true, |t| entry["operationType"] == t)
                        });
                        let status = captures.status(&session);
                        if args.clear {
                            buffer.clear();
                        }
                        ToolResult::ok(json!({
                            "count": operations.len(),
                            "operations": operations,
                            "capture": status,
                        }))
                    }
                },
            )
            .add(
                "graphql_stop_capture",
                "Stop recording GraphQL operations and drop the buffer",
                move |client, _args: NoArgs, session| {
                    let captures = stop.clone();
                    async move {
                        match captures.stop(&client, &session) {
                            Some(dropped) => ToolResult::ok(json!({ "stopped": true, "discarded": dropped })),
                            None => ToolResult::error("GraphQL capture is not running"),
                        }
                    }
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(GraphqlProvider, "graphql");

/// One entry per request; batched requests keep their index.
fn graphql_entry(event: &CdpEvent) -> Option<Value> {
    let request = &event.params["request"];
    if request["method"] != "POST" {
        return None;
    }
    let body: Value = serde_json::from_str(request["postData"].as_str()?).ok()?;

    let operations: Vec<Value> = match &body {
        Value::Array(batch) => batch.iter().filter_map(operation).collect(),
        single => operation(single).into_iter().collect(),
    };
    let first = operations.first()?.clone();

    let mut entry = json!({
        "requestId": event.params["requestId"],
        "url": request["url"],
        "timestamp": event.params["timestamp"],
        "operationName": first["operationName"],
        "operationType": first["operationType"],
        "variables": first["variables"],
        "query": first["query"],
    });
    if operations.len() > 1 {
        entry["batch"] = Value::Array(operations);
    }
    Some(entry)
}

fn operation(body: &Value) -> Option<Value> {
    let query = body["query"].as_str();
    let persisted = body["extensions"]["persistedQuery"].is_object();
    if query.is_none() && !persisted {
        return None;
    }

    let (kind, parsed_name) = query.map(parse_operation).unwrap_or(("query", None));
    let name = body["operationName"]
        .as_str()
        .map(String::from)
        .or(parsed_name);

    Some(json!({
        "operationName": name,
        "operationType": kind,
        "variables": body.get("variables").cloned().unwrap_or(Value::Null),
        "query": query,
        "persisted": persisted,
    }))
}

/// Operation keyword and name from a GraphQL document. Anonymous `{ ... }`
/// documents are queries.
fn parse_operation(document: &str) -> (&'static str, Option<String>) {
    let text: String = document
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join(" ");
    let mut words = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty());

    let kind = match words.next() {
        Some("mutation") => "mutation",
        Some("subscription") => "subscription",
        _ => "query",
    };
    let starts_with_keyword = text
        .trim_start()
        .starts_with(|c: char| c.is_alphabetic());
    let name = if starts_with_keyword {
        words
            .next()
            .filter(|w| !matches!(*w, "fragment" | "on"))
            .map(String::from)
    } else {
        None
    };
    (kind, name)
}
