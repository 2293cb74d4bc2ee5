//! CDP Protocol Types
//!
//! Wire shapes dictated by the browser. Keep them minimal - domain payloads
//! stay as `serde_json::Value` unless a caller needs to look inside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request ID - monotonically increasing, unique per connection
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// CDP command sent to the browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,
}

/// CDP response from the browser
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CdpResponse {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,
}

/// Error payload carried by a failed response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// CDP event from the browser (no request ID)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CdpEvent {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,
}

impl CdpEvent {
    pub fn new(method: impl Into<String>, params: Value, session_id: Option<SessionId>) -> Self {
        Self {
            method: method.into(),
            params,
            session_id,
        }
    }
}

/// Incoming frame, classified by the presence of `id`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CdpMessage {
    Response(CdpResponse),
    Event(CdpEvent),
}

impl CdpMessage {
    /// Parse one text frame. Frames carrying an `id` are responses; frames
    /// with only a `method` are events.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Target Info from Target.getTargets / Target.getTargetInfo
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: TargetId,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

/// Result of Target.attachToTarget
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// Options for Runtime.evaluate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateOptions {
    pub return_by_value: bool,
    pub await_promise: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_gesture: Option<bool>,
    /// Per-call override of the dispatcher timeout; not sent on the wire.
    #[serde(skip)]
    pub timeout_ms: Option<u64>,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            return_by_value: true,
            await_promise: false,
            user_gesture: None,
            timeout_ms: None,
        }
    }
}

impl EvaluateOptions {
    pub fn awaiting() -> Self {
        Self {
            await_promise: true,
            ..Self::default()
        }
    }
}

/// Summarize `exceptionDetails` into one line.
///
/// Prefers the thrown exception's description, falls back to the details'
/// own `text` field.
pub fn exception_summary(details: &Value) -> String {
    let description = details["exception"]["description"]
        .as_str()
        .or_else(|| details["exception"]["value"].as_str())
        .map(|d| d.lines().next().unwrap_or(d).to_string());

    match description {
        Some(d) if !d.is_empty() => d,
        _ => details["text"]
            .as_str()
            .filter(|t| !t.is_empty())
            .unwrap_or("Unknown script error")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_classification() {
        let msg = CdpMessage::parse(r#"{"id":7,"result":{"ok":true}}"#).unwrap();
        match msg {
            CdpMessage::Response(r) => {
                assert_eq!(r.id, 7);
                assert_eq!(r.result, Some(json!({"ok": true})));
            }
            _ => panic!("Expected response"),
        }
    }

    #[test]
    fn test_event_classification() {
        let msg = CdpMessage::parse(
            r#"{"method":"Debugger.paused","params":{"reason":"other"},"sessionId":"S1"}"#,
        )
        .unwrap();
        match msg {
            CdpMessage::Event(e) => {
                assert_eq!(e.method, "Debugger.paused");
                assert_eq!(e.session_id.as_deref(), Some("S1"));
                assert_eq!(e.params["reason"], "other");
            }
            _ => panic!("Expected event"),
        }
    }

    #[test]
    fn test_error_response() {
        let msg =
            CdpMessage::parse(r#"{"id":3,"error":{"code":-32000,"message":"boom"}}"#).unwrap();
        match msg {
            CdpMessage::Response(r) => {
                let err = r.error.unwrap();
                assert_eq!(err.code, -32000);
                assert_eq!(err.message, "boom");
            }
            _ => panic!("Expected response"),
        }
    }

    #[test]
    fn test_request_omits_empty_fields() {
        let req = CdpRequest {
            id: 1,
            method: "Browser.getVersion".into(),
            params: None,
            session_id: None,
        };
        let text = serde_json::to_string(&req).unwrap();
        assert_eq!(text, r#"{"id":1,"method":"Browser.getVersion"}"#);
    }

    #[test]
    fn test_exception_summary_prefers_description() {
        let details = json!({
            "text": "Uncaught",
            "exception": {"description": "ReferenceError: X is not defined\n    at <anonymous>:1:1"}
        });
        assert_eq!(exception_summary(&details), "ReferenceError: X is not defined");
        assert_eq!(exception_summary(&json!({"text": "Uncaught"})), "Uncaught");
        assert_eq!(exception_summary(&json!({})), "Unknown script error");
    }
}
