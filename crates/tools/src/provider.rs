//! Tool Provider contract.
//!
//! A provider is a fixed set of named tools. Every tool call runs the same
//! pipeline, built once here so providers only write the execute step:
//!
//! 1. validate: deserialize the arguments into the tool's typed struct
//! 2. resolve session: explicit `sessionId` argument, then the caller's
//!    context, then the default session
//! 3. execute: the provider's closure, usually one `Runtime.evaluate`
//! 4. normalize: the closure returns a `ToolResult`
//!
//! A panic anywhere in the pipeline still produces a failed `ToolResult`.

use cdp::{CdpClient, SessionId};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::error::ToolError;
use crate::result::ToolResult;

/// Static description of one tool, as listed to MCP clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Per-call context supplied by the protocol layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    pub session_id: Option<SessionId>,
}

impl ToolContext {
    pub fn for_session(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }
}

pub type HandlerFuture = BoxFuture<'static, ToolResult>;

/// Executable closure for one tool.
pub type ToolHandler = Arc<dyn Fn(Value, ToolContext) -> HandlerFuture + Send + Sync>;

/// Metadata plus handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub metadata: ToolMetadata,
    pub handler: ToolHandler,
}

/// Arguments for tools that take none.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct NoArgs {}

pub trait ToolProvider: Send + Sync {
    /// Short provider name, e.g. "redux".
    fn name(&self) -> &str;

    fn tools(&self) -> &[RegisteredTool];

    fn list_tools(&self) -> Vec<ToolMetadata> {
        self.tools().iter().map(|t| t.metadata.clone()).collect()
    }

    fn get_handler(&self, name: &str) -> Option<ToolHandler> {
        self.tools()
            .iter()
            .find(|t| t.metadata.name == name)
            .map(|t| t.handler.clone())
    }
}

/// Collects a provider's tools, wiring each through the shared pipeline.
pub struct ToolSet {
    client: Arc<CdpClient>,
    tools: Vec<RegisteredTool>,
}

impl ToolSet {
    pub fn new(client: Arc<CdpClient>) -> Self {
        Self {
            client,
            tools: Vec::new(),
        }
    }

    /// Add a session-scoped tool. `run` receives the validated arguments and
    /// the resolved session id.
    pub fn add<A, F, Fut>(mut self, name: &str, description: &str, run: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(Arc<CdpClient>, A, SessionId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let run = Arc::new(run);
        let tool_name = name.to_string();
        let client = self.client.clone();

        let handler: ToolHandler = Arc::new(move |raw: Value, ctx: ToolContext| {
            let run = run.clone();
            let client = client.clone();
            let tool_name = tool_name.clone();
            guarded(tool_name.clone(), async move {
                let (args, explicit_session) = match parse_args::<A>(&tool_name, raw) {
                    Ok(parsed) => parsed,
                    Err(result) => return result,
                };
                let requested = explicit_session.or(ctx.session_id);
                let session_id = match client.resolve_session(requested.as_deref()) {
                    Ok(id) => id,
                    Err(e) => return ToolResult::from_cdp_error(&e),
                };
                tracing::debug!("{} on session {}", tool_name, session_id);
                run(client, args, session_id).await
            })
        });

        self.tools.push(RegisteredTool {
            metadata: metadata::<A>(name, description, true),
            handler,
        });
        self
    }

    /// Add a browser-level tool that does not need an attached session.
    pub fn add_browser<A, F, Fut>(mut self, name: &str, description: &str, run: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(Arc<CdpClient>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let run = Arc::new(run);
        let tool_name = name.to_string();
        let client = self.client.clone();

        let handler: ToolHandler = Arc::new(move |raw: Value, _ctx: ToolContext| {
            let run = run.clone();
            let client = client.clone();
            let tool_name = tool_name.clone();
            guarded(tool_name.clone(), async move {
                let (args, _) = match parse_args::<A>(&tool_name, raw) {
                    Ok(parsed) => parsed,
                    Err(result) => return result,
                };
                run(client, args).await
            })
        });

        self.tools.push(RegisteredTool {
            metadata: metadata::<A>(name, description, false),
            handler,
        });
        self
    }

    pub fn build(self) -> Vec<RegisteredTool> {
        self.tools
    }
}

/// Box the future and turn a panic into a failed result.
fn guarded<Fut>(tool_name: String, fut: Fut) -> HandlerFuture
where
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    async move {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Tool {} panicked", tool_name);
                ToolResult::error(format!("Tool {} failed with an internal error", tool_name))
            }
        }
    }
    .boxed()
}

/// Deserialize arguments, pulling out the optional `sessionId` first.
///
/// `null` counts as "no arguments".
fn parse_args<A: DeserializeOwned>(
    tool: &str,
    raw: Value,
) -> Result<(A, Option<SessionId>), ToolResult> {
    let mut raw = match raw {
        Value::Null => Value::Object(Map::new()),
        Value::Object(map) => Value::Object(map),
        other => {
            return Err(invalid_arguments(
                tool,
                format!("expected an object, got {}", type_name(&other)),
            ))
        }
    };

    let session_id = raw
        .as_object_mut()
        .and_then(|map| map.remove("sessionId"))
        .and_then(|v| v.as_str().map(String::from));

    serde_json::from_value(raw)
        .map(|args| (args, session_id))
        .map_err(|e| invalid_arguments(tool, e.to_string()))
}

fn invalid_arguments(tool: &str, reason: String) -> ToolResult {
    let err = ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };
    ToolResult::error(err.to_string())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSON-Schema for `A`, plus the shared `sessionId` property on
/// session-scoped tools.
fn metadata<A: JsonSchema>(name: &str, description: &str, session_scoped: bool) -> ToolMetadata {
    let mut schema = serde_json::to_value(schemars::schema_for!(A))
        .unwrap_or_else(|_| json!({ "type": "object" }));

    if let Some(map) = schema.as_object_mut() {
        map.remove("$schema");
        map.remove("title");
        map.entry("type").or_insert_with(|| json!("object"));
        if session_scoped {
            let properties = map
                .entry("properties")
                .or_insert_with(|| json!({}));
            if let Some(properties) = properties.as_object_mut() {
                properties.insert(
                    "sessionId".to_string(),
                    json!({
                        "type": "string",
                        "description": "CDP session to run in. Defaults to the first attached tab."
                    }),
                );
            }
        }
    }

    ToolMetadata {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: schema,
    }
}
