//! Tool execution result.
//!
//! The one shape every handler returns, whatever it did on the wire.

use cdp::CdpError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const FALLBACK_ERROR: &str = "Unknown error";

/// Result of a tool execution.
///
/// `success == false` always carries a non-empty `error`. `data` may be set
/// on failure to carry diagnostics such as exception details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(non_empty(error.into())),
            warnings: Vec::new(),
        }
    }

    pub fn error_with_data(error: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::error(error)
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Map a CDP failure with no extra context.
    pub fn from_cdp_error(err: &CdpError) -> Self {
        Self::from_cdp_error_in(None, err)
    }

    /// Map a CDP failure.
    ///
    /// - connection loss, missing sessions and timeouts: the error message
    ///   as-is, no data
    /// - script exceptions: `Script execution error: ...` with the exception
    ///   details as data
    /// - browser-reported protocol errors: `<context>: <browser message>`
    pub fn from_cdp_error_in(context: Option<&str>, err: &CdpError) -> Self {
        match err {
            CdpError::ScriptException { details, .. } => {
                Self::error_with_data(err.to_string(), details.clone())
            }
            CdpError::Protocol { .. } | CdpError::InvalidResponse { .. } | CdpError::Json(_) => {
                match context {
                    Some(context) => Self::error(format!("{}: {}", context, err.root_cause())),
                    None => Self::error(err.root_cause()),
                }
            }
            other => Self::error(other.to_string()),
        }
    }

    /// Successful CDP result as data, failure mapped under `context`.
    pub fn from_cdp_result(context: &str, result: cdp::Result<Value>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::from_cdp_error_in(Some(context), &e),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// MCP `tools/call` result body: the whole result as one JSON text block.
    pub fn to_mcp_content(&self) -> Value {
        let text = serde_json::to_string_pretty(self)
            .unwrap_or_else(|_| r#"{"success":false,"error":"Unserializable result"}"#.to_string());
        json!({
            "content": [{ "type": "text", "text": text }],
            "isError": !self.success,
        })
    }
}

fn non_empty(error: String) -> String {
    if error.trim().is_empty() {
        FALLBACK_ERROR.to_string()
    } else {
        error
    }
}
