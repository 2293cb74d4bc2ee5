//! WebSocket frame capture through the Network domain.

use cdp::{CdpClient, CdpEvent};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::capture::{Captures, EntryMapper};
use crate::cleanup::forget_closed_sessions;
use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::result::ToolResult;

const METHODS: &[&str] = &[
    "Network.webSocketCreated",
    "Network.webSocketFrameSent",
    "Network.webSocketFrameReceived",
    "Network.webSocketFrameError",
    "Network.webSocketClosed",
];

/// Payloads longer than this are cut in the buffer.
const MAX_PAYLOAD: usize = 4096;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetFramesArgs {
    /// Substring of the socket URL
    #[serde(default)]
    pub url: Option<String>,
    /// sent, received, error, open or close
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default = "super::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub clear: bool,
}

pub struct WebSocketProvider {
    tools: Vec<RegisteredTool>,
}

impl WebSocketProvider {
    pub fn new(client: Arc<CdpClient>, capacity: usize) -> Self {
        let captures = Arc::new(Captures::new("websocket", capacity));
        forget_closed_sessions(&client, &captures);
        let (start, get, stop) = (captures.clone(), captures.clone(), captures);

        let tools = ToolSet::new(client)
            .add(
                "websocket_start_capture",
                "Start buffering WebSocket frames opened after this call",
                move |client, _args: NoArgs, session| {
                    let captures = start.clone();
                    async move {
                        if let Err(e) = client.ensure_domain(Some(&session), "Network").await {
                            return ToolResult::from_cdp_error_in(Some("Error starting WebSocket capture"), &e);
                        }
                        if captures.start(&client, &session, METHODS, frame_mapper()) {
                            ToolResult::ok(captures.status(&session))
                        } else {
                            ToolResult::ok(captures.status(&session))
                                .with_warning("WebSocket capture was already running")
                        }
                    }
                },
            )
            .add(
                "websocket_get_frames",
                "Read captured WebSocket frames",
                move |_client, args: GetFramesArgs, session| {
                    let captures = get.clone();
                    async move {
                        let Some(buffer) = captures.buffer(&session) else {
                            return ToolResult::error(
                                "WebSocket capture is not running. Call websocket_start_capture first.",
                            );
                        };
                        let frames = buffer.recent(args.limit, |frame| {
                            args.direction.as_deref().map_or(true, |d| frame["direction"] == d)
                                && args.url.as_deref().map_or(true, |u| {
                                    frame["url"].as_str().is_some_and(|url| url.contains(u))
                                })
                        });
                        let status = captures.status(&session);
                        if args.clear {
                            buffer.clear();
                        }
                        ToolResult::ok(json!({ "count": frames.len(), "frames": frames, "capture": status }))
                    }
                },
            )
            .add(
                "websocket_stop_capture",
                "Stop capturing WebSocket frames and drop the buffer",
                move |client, _args: NoArgs, session| {
                    let captures = stop.clone();
                    async move {
                        match captures.stop(&client, &session) {
                            Some(dropped) => ToolResult::ok(json!({ "stopped": true, "discarded": dropped })),
                            None => ToolResult::error("WebSocket capture is not running"),
                        }
                    }
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(WebSocketProvider, "websocket");

/// Mapper that remembers socket URLs by request id, since frame events
/// only carry the id.
fn frame_mapper() -> EntryMapper {
    let urls: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
    Arc::new(move |event: &CdpEvent| frame_entry(&urls, event))
}

fn frame_entry(urls: &DashMap<String, String>, event: &CdpEvent) -> Option<Value> {
    let params = &event.params;
    let request_id = params["requestId"].as_str()?.to_string();
    let url = |urls: &DashMap<String, String>| urls.get(&request_id).map(|u| u.value().clone());

    let entry = match event.method.as_str() {
        "Network.webSocketCreated" => {
            let created = params["url"].as_str().unwrap_or_default().to_string();
            urls.insert(request_id.clone(), created.clone());
            json!({ "direction": "open", "requestId": request_id, "url": created })
        }
        "Network.webSocketFrameSent" | "Network.webSocketFrameReceived" => {
            let direction = if event.method.ends_with("Sent") { "sent" } else { "received" };
            let response = &params["response"];
            let payload = response["payloadData"].as_str().unwrap_or_default();
            // opcode 1 is text, 2 is binary (base64 on the wire)
            let binary = response["opcode"].as_i64() == Some(2);
            json!({
                "direction": direction,
                "requestId": request_id,
                "url": url(urls),
                "timestamp": params["timestamp"],
                "opcode": response["opcode"],
                "binary": binary,
                "length": payload.len(),
                "payload": truncate(payload, MAX_PAYLOAD),
            })
        }
        "Network.webSocketFrameError" => json!({
            "direction": "error",
            "requestId": request_id,
            "url": url(urls),
            "timestamp": params["timestamp"],
            "error": params["errorMessage"],
        }),
        "Network.webSocketClosed" => {
            let closed = urls.remove(&request_id).map(|(_, u)| u);
            json!({
                "direction": "close",
                "requestId": request_id,
                "url": closed,
                "timestamp": params["timestamp"],
            })
        }
        _ => return None,
    };
    Some(entry)
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
