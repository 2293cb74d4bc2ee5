//! Error types for CDP operations
//!
//! Flat hierarchy. Callers branch on kind, not on message text.

use serde_json::Value;
use thiserror::Error;

/// Message used whenever the transport goes away under a caller.
pub const CONNECTION_LOST: &str = "Connection lost";

#[derive(Error, Debug)]
pub enum CdpError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The browser answered the command with an error payload.
    #[error("CDP protocol error: {code} - {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// No response arrived in time. The only retryable kind.
    #[error("CDP command {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// Transport closed, or closed while the command was in flight.
    #[error("{0}")]
    ConnectionLost(String),

    #[error("No active browser session. Connect to a browser tab first.")]
    NoActiveSession,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// `Runtime.evaluate` round-tripped fine but the script threw.
    #[error("Script execution error: {message}")]
    ScriptException { message: String, details: Value },

    /// The browser answered, but not with the shape the method promises.
    #[error("Invalid response to {method}: {reason}")]
    InvalidResponse { method: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CdpError>;

impl CdpError {
    pub fn connection_lost() -> Self {
        CdpError::ConnectionLost(CONNECTION_LOST.to_string())
    }

    /// Timeouts may succeed on a second attempt; everything else is terminal
    /// at this layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CdpError::Timeout { .. })
    }

    /// Errors that mean there is no usable browser behind the client.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            CdpError::ConnectionLost(_)
                | CdpError::WebSocket(_)
                | CdpError::NoActiveSession
                | CdpError::SessionNotFound(_)
        )
    }

    /// Human-readable root cause without the error-kind prefix.
    ///
    /// Protocol errors surface the browser's message verbatim, which is what
    /// an agent needs to fix its input.
    pub fn root_cause(&self) -> String {
        match self {
            CdpError::Protocol { message, .. } => message.clone(),
            CdpError::ScriptException { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
