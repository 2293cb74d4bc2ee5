//! In-process transport.
//!
//! `pair()` returns a transport plus the browser end of the wire. The browser
//! end reads the commands the client wrote and answers them by hand, or
//! through a `serve` closure. Used to embed a scripted browser and to drive
//! the client in tests without Chrome.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Inbound, InboundRx, Transport};
use crate::error::{CdpError, Result};
use crate::protocol::{CdpRequest, RequestId};

/// Client end of the loopback wire.
pub struct LoopbackTransport {
    outgoing: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
}

/// Browser end of the loopback wire.
pub struct LoopbackBrowser {
    commands: mpsc::UnboundedReceiver<String>,
    peer: BrowserPeer,
}

/// Cloneable handle for writing frames back to the client.
#[derive(Clone)]
pub struct BrowserPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    open: Arc<AtomicBool>,
}

/// What a `serve` handler does with one command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with a `result` payload.
    Result(Value),
    /// Answer with an `error` payload.
    Error { code: i64, message: String },
    /// Never answer.
    Silent,
    /// Drop the connection instead of answering.
    Disconnect,
}

impl Reply {
    /// Empty success, what `*.enable` returns.
    pub fn ok() -> Self {
        Reply::Result(json!({}))
    }

    /// A `Runtime.evaluate` result carrying `value` by value.
    pub fn value(value: Value) -> Self {
        Reply::Result(json!({ "result": { "type": "object", "value": value } }))
    }

    /// A `Runtime.evaluate` result whose script threw.
    pub fn exception(description: &str) -> Self {
        Reply::Result(json!({
            "result": { "type": "object", "subtype": "error", "description": description },
            "exceptionDetails": {
                "exceptionId": 1,
                "text": "Uncaught",
                "lineNumber": 0,
                "columnNumber": 0,
                "exception": { "type": "object", "subtype": "error", "description": description }
            }
        }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            code: -32000,
            message: message.into(),
        }
    }
}

/// Create a connected transport / browser pair.
pub fn pair() -> (Arc<LoopbackTransport>, InboundRx, LoopbackBrowser) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));

    let transport = Arc::new(LoopbackTransport {
        outgoing: out_tx,
        open: open.clone(),
    });
    let browser = LoopbackBrowser {
        commands: out_rx,
        peer: BrowserPeer {
            inbound: in_tx,
            open,
        },
    };

    (transport, in_rx, browser)
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if !self.is_open() {
            return Err(CdpError::connection_lost());
        }
        self.outgoing
            .send(frame)
            .map_err(|_| CdpError::connection_lost())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl LoopbackBrowser {
    pub fn peer(&self) -> BrowserPeer {
        self.peer.clone()
    }

    /// Next command written by the client, or `None` once the client side is
    /// gone.
    pub async fn next_command(&mut self) -> Option<CdpRequest> {
        loop {
            let text = self.commands.recv().await?;
            match serde_json::from_str(&text) {
                Ok(request) => return Some(request),
                Err(e) => tracing::warn!("Loopback browser got unparseable frame: {}", e),
            }
        }
    }

    /// Answer every command through `handler` until the client goes away.
    pub fn serve<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(&CdpRequest, &BrowserPeer) -> Reply + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(request) = self.next_command().await {
                let peer = self.peer.clone();
                match handler(&request, &peer) {
                    Reply::Result(result) => peer.respond(request.id, result),
                    Reply::Error { code, message } => peer.respond_error(request.id, code, &message),
                    Reply::Silent => {}
                    Reply::Disconnect => {
                        peer.disconnect("loopback disconnect");
                        break;
                    }
                }
            }
        })
    }

    pub fn respond(&self, id: RequestId, result: Value) {
        self.peer.respond(id, result);
    }

    pub fn respond_error(&self, id: RequestId, code: i64, message: &str) {
        self.peer.respond_error(id, code, message);
    }

    pub fn emit(&self, method: &str, params: Value, session_id: Option<&str>) {
        self.peer.emit(method, params, session_id);
    }

    pub fn disconnect(&self, reason: &str) {
        self.peer.disconnect(reason);
    }
}

impl BrowserPeer {
    pub fn respond(&self, id: RequestId, result: Value) {
        self.send_raw(json!({ "id": id, "result": result }).to_string());
    }

    pub fn respond_error(&self, id: RequestId, code: i64, message: &str) {
        self.send_raw(json!({ "id": id, "error": { "code": code, "message": message } }).to_string());
    }

    pub fn emit(&self, method: &str, params: Value, session_id: Option<&str>) {
        let mut frame = json!({ "method": method, "params": params });
        if let Some(session_id) = session_id {
            frame["sessionId"] = json!(session_id);
        }
        self.send_raw(frame.to_string());
    }

    /// Push an arbitrary text frame, valid JSON or not.
    pub fn send_raw(&self, text: String) {
        if self.open.load(Ordering::SeqCst) {
            let _ = self.inbound.send(Inbound::Frame(text));
        }
    }

    pub fn disconnect(&self, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.inbound.send(Inbound::Closed {
                reason: reason.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commands_reach_browser() {
        let (transport, _rx, mut browser) = pair();
        transport
            .send(r#"{"id":1,"method":"Runtime.enable"}"#.to_string())
            .await
            .unwrap();

        let request = browser.next_command().await.unwrap();
        assert_eq!(request.id, 1);
        assert_eq!(request.method, "Runtime.enable");
    }

    #[tokio::test]
    async fn test_disconnect_closes_both_ends() {
        let (transport, mut rx, browser) = pair();
        browser.disconnect("gone");

        match rx.recv().await {
            Some(Inbound::Closed { reason }) => assert_eq!(reason, "gone"),
            other => panic!("Expected close, got {:?}", other),
        }
        assert!(!transport.is_open());
        let err = transport.send("{}".to_string()).await.unwrap_err();
        assert_eq!(err.to_string(), "Connection lost");
    }
}
