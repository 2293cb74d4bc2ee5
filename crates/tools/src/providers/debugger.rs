//! JavaScript debugger control.
//!
//! Pause state is tracked per session from `Debugger.paused` /
//! `Debugger.resumed`, so tools can answer "where are we stopped" without a
//! round-trip. Stepping waits for the next pause to report the new location.

use cdp::protocol::exception_summary;
use cdp::{CdpClient, CdpError, CdpEvent, SessionId, SubscriptionHandle};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::runtime::remote_object_summary;
use crate::cleanup::{forget_closed_sessions, SessionScoped};
use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::result::ToolResult;

const NOT_PAUSED: &str = "Debugger is not paused";
const MAX_FRAMES: usize = 20;

type PausedSlot = Arc<Mutex<Option<Value>>>;

struct Tracker {
    handles: Vec<SubscriptionHandle>,
    paused: PausedSlot,
}

/// Per-session pause tracking.
#[derive(Default)]
struct PauseTracking {
    sessions: DashMap<SessionId, Tracker>,
}

impl PauseTracking {
    /// Subscribe and enable the Debugger domain once per session.
    async fn ensure(&self, client: &CdpClient, session: &str) -> Result<PausedSlot, CdpError> {
        if client.sessions().is_domain_enabled(session, "Debugger") {
            if let Some(tracker) = self.sessions.get(session) {
                return Ok(tracker.paused.clone());
            }
        }

        let paused: PausedSlot = Arc::new(Mutex::new(None));
        let slot = paused.clone();
        // One queue for both, so a resume never overtakes the pause after it
        let handles = client.on_many(
            &["Debugger.paused", "Debugger.resumed"],
            Some(session.to_string()),
            Arc::new(move |event: CdpEvent| {
                let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
                *slot = match event.method.as_str() {
                    "Debugger.paused" => Some(event.params),
                    _ => None,
                };
            }),
        );
        if let Some((_, stale)) = self.sessions.remove(session) {
            stale.handles.iter().for_each(|h| {
                client.off(h);
            });
        }
        self.sessions.insert(
            session.to_string(),
            Tracker {
                handles,
                paused: paused.clone(),
            },
        );

        if let Err(e) = client.ensure_domain(Some(session), "Debugger").await {
            if let Some((_, tracker)) = self.sessions.remove(session) {
                tracker.handles.iter().for_each(|h| {
                    client.off(h);
                });
            }
            return Err(e);
        }
        // A concurrent call may have replaced our tracker
        Ok(self
            .sessions
            .get(session)
            .map(|t| t.paused.clone())
            .unwrap_or(paused))
    }
}

impl SessionScoped for PauseTracking {
    fn forget_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    fn held_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

fn current(slot: &PausedSlot) -> Option<Value> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointArgs {
    /// Exact script URL
    #[serde(default)]
    pub url: Option<String>,
    /// Regex over script URLs, used when `url` is not given
    #[serde(default)]
    pub url_regex: Option<String>,
    /// 1-based line
    pub line_number: u32,
    /// 1-based column
    #[serde(default)]
    pub column_number: Option<u32>,
    /// Only pause when this expression is truthy
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveBreakpointArgs {
    pub breakpoint_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PauseArgs {
    /// How long to wait for the pause to land
    #[serde(default = "default_wait")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    #[default]
    Over,
    Into,
    Out,
}

impl StepAction {
    fn method(self) -> &'static str {
        match self {
            StepAction::Over => "Debugger.stepOver",
            StepAction::Into => "Debugger.stepInto",
            StepAction::Out => "Debugger.stepOut",
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepArgs {
    #[serde(default)]
    pub action: StepAction,
    #[serde(default = "default_wait")]
    pub timeout_ms: u64,
}

fn default_wait() -> u64 {
    2_000
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateOnFrameArgs {
    pub expression: String,
    /// Frame to evaluate in; the top frame when omitted
    #[serde(default)]
    pub call_frame_id: Option<String>,
}

pub struct DebuggerProvider {
    tools: Vec<RegisteredTool>,
}

impl DebuggerProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tracking = Arc::new(PauseTracking::default());
        forget_closed_sessions(&client, &tracking);
        let (t1, t2, t3, t4, t5, t6, t7) = (
            tracking.clone(),
            tracking.clone(),
            tracking.clone(),
            tracking.clone(),
            tracking.clone(),
            tracking.clone(),
            tracking,
        );

        let tools = ToolSet::new(client)
            .add(
                "debugger_set_breakpoint",
                "Set a breakpoint by script URL and line",
                move |client, args: SetBreakpointArgs, session| {
                    let tracking = t1.clone();
                    async move { set_breakpoint(&client, &tracking, args, &session).await }
                },
            )
            .add(
                "debugger_remove_breakpoint",
                "Remove a breakpoint",
                move |client, args: RemoveBreakpointArgs, session| {
                    let tracking = t2.clone();
                    async move {
                        const CONTEXT: &str = "Error removing breakpoint";
                        if let Err(e) = tracking.ensure(&client, &session).await {
                            return ToolResult::from_cdp_error_in(Some(CONTEXT), &e);
                        }
                        let result = client
                            .send(
                                "Debugger.removeBreakpoint",
                                Some(json!({ "breakpointId": args.breakpoint_id })),
                                Some(&session),
                            )
                            .await
                            .map(|_| json!({ "removed": args.breakpoint_id }));
                        ToolResult::from_cdp_result(CONTEXT, result)
                    }
                },
            )
            .add(
                "debugger_pause",
                "Pause JavaScript execution",
                move |client, args: PauseArgs, session| {
                    let tracking = t3.clone();
                    async move { pause(&client, &tracking, args, &session).await }
                },
            )
            .add(
                "debugger_resume",
                "Resume execution after a pause",
                move |client, _args: NoArgs, session| {
                    let tracking = t4.clone();
                    async move {
                        const CONTEXT: &str = "Error resuming";
                        let slot = match tracking.ensure(&client, &session).await {
                            Ok(slot) => slot,
                            Err(e) => return ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
                        };
                        if current(&slot).is_none() {
                            return ToolResult::error(NOT_PAUSED);
                        }
                        let result = client
                            .send("Debugger.resume", None, Some(&session))
                            .await
                            .map(|_| json!({ "resumed": true }));
                        ToolResult::from_cdp_result(CONTEXT, result)
                    }
                },
            )
            .add(
                "debugger_step",
                "Step over, into or out of the current statement",
                move |client, args: StepArgs, session| {
                    let tracking = t5.clone();
                    async move { step(&client, &tracking, args, &session).await }
                },
            )
            .add(
                "debugger_get_paused_state",
                "Whether execution is paused, why, and the call stack",
                move |client, _args: NoArgs, session| {
                    let tracking = t6.clone();
                    async move {
                        match tracking.ensure(&client, &session).await {
                            Ok(slot) => ToolResult::ok(paused_summary(current(&slot).as_ref())),
                            Err(e) => ToolResult::from_cdp_error_in(Some("Error reading paused state"), &e),
                        }
                    }
                },
            )
            .add(
                "debugger_evaluate_on_frame",
                "Evaluate an expression in a paused call frame",
                move |client, args: EvaluateOnFrameArgs, session| {
                    let tracking = t7.clone();
                    async move { evaluate_on_frame(&client, &tracking, args, &session).await }
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(DebuggerProvider, "debugger");

async fn set_breakpoint(
    client: &CdpClient,
    tracking: &PauseTracking,
    args: SetBreakpointArgs,
    session: &str,
) -> ToolResult {
    const CONTEXT: &str = "Error setting breakpoint";

    let mut params = json!({ "lineNumber": args.line_number.saturating_sub(1) });
    match (&args.url, &args.url_regex) {
        (Some(url), _) => params["url"] = json!(url),
        (None, Some(regex)) => params["urlRegex"] = json!(regex),
        (None, None) => return ToolResult::error("Either url or urlRegex is required"),
    }
    if let Some(column) = args.column_number {
        params["columnNumber"] = json!(column.saturating_sub(1));
    }
    if let Some(condition) = &args.condition {
        params["condition"] = json!(condition);
    }

    if let Err(e) = tracking.ensure(client, session).await {
        return ToolResult::from_cdp_error_in(Some(CONTEXT), &e);
    }
    let result = client
        .send("Debugger.setBreakpointByUrl", Some(params), Some(session))
        .await
        .map(|r| {
            json!({
                "breakpointId": r["breakpointId"],
                "locations": r["locations"],
                "resolved": r["locations"].as_array().map_or(0, Vec::len),
            })
        });
    ToolResult::from_cdp_result(CONTEXT, result)
}

async fn pause(client: &CdpClient, tracking: &PauseTracking, args: PauseArgs, session: &str) -> ToolResult {
    const CONTEXT: &str = "Error pausing";

    let slot = match tracking.ensure(client, session).await {
        Ok(slot) => slot,
        Err(e) => return ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
    };
    if let Some(paused) = current(&slot) {
        return ToolResult::ok(paused_summary(Some(&paused))).with_warning("Already paused");
    }

    let (handle, mut rx) = client.stream("Debugger.paused", Some(session.to_string()));
    let sent = client.send("Debugger.pause", None, Some(session)).await;
    let result = match sent {
        Ok(_) => {
            let waited = Duration::from_millis(args.timeout_ms);
            match tokio::time::timeout(waited, rx.recv()).await {
                Ok(Some(event)) => ToolResult::ok(paused_summary(Some(&event.params))),
                _ => ToolResult::ok(json!({ "paused": false, "pauseRequested": true })).with_warning(
                    "Pause requested; execution stops at the next JavaScript statement",
                ),
            }
        }
        Err(e) => ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
    };
    client.off(&handle);
    result
}

async fn step(client: &CdpClient, tracking: &PauseTracking, args: StepArgs, session: &str) -> ToolResult {
    const CONTEXT: &str = "Error stepping";

    let slot = match tracking.ensure(client, session).await {
        Ok(slot) => slot,
        Err(e) => return ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
    };
    if current(&slot).is_none() {
        return ToolResult::error(NOT_PAUSED);
    }

    let (handle, mut rx) = client.stream("Debugger.paused", Some(session.to_string()));
    let sent = client.send(args.action.method(), None, Some(session)).await;
    let result = match sent {
        Ok(_) => {
            let waited = Duration::from_millis(args.timeout_ms);
            match tokio::time::timeout(waited, rx.recv()).await {
                Ok(Some(event)) => ToolResult::ok(paused_summary(Some(&event.params))),
                // Stepping off the end of the stack resumes execution
                _ => ToolResult::ok(json!({ "paused": false, "stepped": true })),
            }
        }
        Err(e) => ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
    };
    client.off(&handle);
    result
}

async fn evaluate_on_frame(
    client: &CdpClient,
    tracking: &PauseTracking,
    args: EvaluateOnFrameArgs,
    session: &str,
) -> ToolResult {
    const CONTEXT: &str = "Error evaluating on frame";

    let slot = match tracking.ensure(client, session).await {
        Ok(slot) => slot,
        Err(e) => return ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
    };
    let Some(paused) = current(&slot) else {
        return ToolResult::error(NOT_PAUSED);
    };
    let frame_id = match args
        .call_frame_id
        .or_else(|| paused["callFrames"][0]["callFrameId"].as_str().map(String::from))
    {
        Some(id) => id,
        None => return ToolResult::error("No call frame to evaluate in"),
    };

    let params = json!({
        "callFrameId": frame_id,
        "expression": args.expression,
        "returnByValue": true,
    });
    match client
        .send("Debugger.evaluateOnCallFrame", Some(params), Some(session))
        .await
    {
        Ok(result) => match result.get("exceptionDetails") {
            Some(details) => ToolResult::from_cdp_error(&CdpError::ScriptException {
                message: exception_summary(details),
                details: details.clone(),
            }),
            None => ToolResult::ok(remote_object_summary(&result["result"])),
        },
        Err(e) => ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
    }
}

/// Compact view of `Debugger.paused` params. Lines and columns are 1-based.
fn paused_summary(paused: Option<&Value>) -> Value {
    let Some(paused) = paused else {
        return json!({ "paused": false });
    };
    let frames: Vec<Value> = paused["callFrames"]
        .as_array()
        .into_iter()
        .flatten()
        .take(MAX_FRAMES)
        .map(|frame| {
            let location = &frame["location"];
            json!({
                "callFrameId": frame["callFrameId"],
                "functionName": frame["functionName"].as_str().filter(|n| !n.is_empty()).unwrap_or("(anonymous)"),
                "url": frame["url"],
                "lineNumber": location["lineNumber"].as_u64().map(|l| l + 1),
                "columnNumber": location["columnNumber"].as_u64().map(|c| c + 1),
            })
        })
        .collect();

    json!({
        "paused": true,
        "reason": paused["reason"],
        "hitBreakpoints": paused.get("hitBreakpoints").cloned().unwrap_or_else(|| json!([])),
        "callFrames": frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_summary() {
        assert_eq!(paused_summary(None), json!({ "paused": false }));

        let params = json!({
            "reason": "other",
            "hitBreakpoints": ["1:9:0:app.js"],
            "callFrames": [{
                "callFrameId": "f0",
                "functionName": "",
                "url": "app.js",
                "location": { "scriptId": "5", "lineNumber": 9, "columnNumber": 0 }
            }]
        });
        let summary = paused_summary(Some(&params));
        assert_eq!(summary["paused"], true);
        assert_eq!(summary["callFrames"][0]["functionName"], "(anonymous)");
        assert_eq!(summary["callFrames"][0]["lineNumber"], 10);
        assert_eq!(summary["callFrames"][0]["columnNumber"], 1);
    }

    #[test]
    fn test_step_methods() {
        assert_eq!(StepAction::default().method(), "Debugger.stepOver");
        assert_eq!(StepAction::Out.method(), "Debugger.stepOut");
    }
}
