//! Command Dispatcher - request/response correlation
//!
//! Design decisions:
//! 1. Ids come from one connection-wide counter, never per session
//! 2. The pending entry is recorded before the frame is written, so a fast
//!    response can never beat its own bookkeeping
//! 3. Timeouts remove the pending entry and fail only that command
//! 4. No retries here. Timeouts are marked retryable; the caller decides.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::error::{CdpError, Result};
use crate::protocol::{CdpRequest, CdpResponse, RequestId, SessionId};
use crate::transport::Transport;

/// In-flight command awaiting its response.
struct PendingCommand {
    tx: oneshot::Sender<Result<Value>>,
    method: String,
    sent_at: Instant,
}

pub struct Dispatcher {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    /// Key: request id, Value: where the response goes
    pending: DashMap<RequestId, PendingCommand>,

    transport: Arc<dyn Transport>,

    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            transport,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Number of commands still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send a command with the default timeout.
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        self.send_with_timeout(method, params, session_id, self.default_timeout)
            .await
    }

    /// Send a command and wait for its `result` payload.
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<SessionId>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id,
        };
        let json = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCommand {
                tx,
                method: request.method.clone(),
                sent_at: Instant::now(),
            },
        );

        tracing::trace!("CDP send: {}", json);
        if let Err(e) = self.transport.send(json).await {
            self.pending.remove(&id);
            tracing::debug!("Failed to write {} (id {}): {}", method, id, e);
            return Err(match e {
                CdpError::ConnectionLost(reason) => CdpError::ConnectionLost(reason),
                _ => CdpError::connection_lost(),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::connection_lost()),
            Err(_) => {
                self.pending.remove(&id);
                tracing::warn!("CDP command {} (id {}) timed out after {:?}", method, id, timeout);
                Err(CdpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Route a response frame to its pending command.
    ///
    /// Returns `false` when nothing was waiting for that id (already timed
    /// out, or never sent); such responses are discarded.
    pub fn resolve(&self, response: CdpResponse) -> bool {
        let Some((_, pending)) = self.pending.remove(&response.id) else {
            tracing::warn!("Discarding response for unknown request: {}", response.id);
            return false;
        };

        tracing::trace!(
            "{} (id {}) answered in {:?}",
            pending.method,
            response.id,
            pending.sent_at.elapsed()
        );

        let outcome = match response.error {
            Some(error) => Err(CdpError::Protocol {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        // Receiver may have been dropped by a caller that lost interest
        let _ = pending.tx.send(outcome);
        true
    }

    /// Reject every pending command. Called when the transport goes away.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                tracing::debug!("Failing {} (id {}): {}", pending.method, id, reason);
                let _ = pending.tx.send(Err(CdpError::ConnectionLost(reason.to_string())));
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback;
    use serde_json::json;

    fn response(id: RequestId, result: Value) -> CdpResponse {
        CdpResponse {
            id,
            result: Some(result),
            error: None,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn test_out_of_order_responses_resolve_their_own_command() {
        let (transport, _rx, mut browser) = loopback::pair();
        let dispatcher = Arc::new(Dispatcher::new(transport, Duration::from_secs(5)));

        let mut handles = Vec::new();
        for n in 0..5u64 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .send("Runtime.evaluate", Some(json!({ "n": n })), None)
                    .await
            }));
        }

        let mut requests = Vec::new();
        for _ in 0..5 {
            requests.push(browser.next_command().await.unwrap());
        }

        // Answer in reverse order, echoing each command's own parameter
        for request in requests.iter().rev() {
            let n = request.params.as_ref().unwrap()["n"].clone();
            assert!(dispatcher.resolve(response(request.id, json!({ "echo": n }))));
        }

        for (n, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result["echo"], json!(n));
        }
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_increasing() {
        let (transport, _rx, mut browser) = loopback::pair();
        let dispatcher = Arc::new(Dispatcher::new(transport, Duration::from_millis(50)));

        for session in ["A", "B", "A"] {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.send("Page.enable", None, Some(session.into())).await });
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(browser.next_command().await.unwrap().id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_timeout_isolated_from_other_commands() {
        let (transport, _rx, mut browser) = loopback::pair();
        let dispatcher = Arc::new(Dispatcher::new(transport, Duration::from_secs(5)));

        let slow = {
            let d = dispatcher.clone();
            tokio::spawn(async move {
                d.send_with_timeout("Runtime.evaluate", None, None, Duration::from_millis(50))
                    .await
            })
        };
        let fast = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.send("Runtime.enable", None, None).await })
        };

        let first = browser.next_command().await.unwrap();
        let second = browser.next_command().await.unwrap();
        let enable = if first.method == "Runtime.enable" { first } else { second };

        let err = slow.await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, CdpError::Timeout { .. }));

        // The other command is still pending and resolves normally
        assert_eq!(dispatcher.pending_count(), 1);
        assert!(dispatcher.resolve(response(enable.id, json!({}))));
        assert_eq!(fast.await.unwrap().unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let (transport, _rx, _browser) = loopback::pair();
        let dispatcher = Dispatcher::new(transport, Duration::from_millis(10));

        let err = dispatcher.send("Page.reload", None, None).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!dispatcher.resolve(response(1, json!({}))));
    }

    #[tokio::test]
    async fn test_protocol_error_surfaces_message() {
        let (transport, _rx, mut browser) = loopback::pair();
        let dispatcher = Arc::new(Dispatcher::new(transport, Duration::from_secs(5)));

        let call = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.send("Runtime.evaluate", None, None).await })
        };
        let request = browser.next_command().await.unwrap();
        dispatcher.resolve(CdpResponse {
            id: request.id,
            result: None,
            error: Some(crate::protocol::ProtocolError {
                code: -32000,
                message: "X is not defined".into(),
                data: None,
            }),
            session_id: None,
        });

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.root_cause(), "X is not defined");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fail_all_rejects_pending_with_connection_lost() {
        let (transport, _rx, mut browser) = loopback::pair();
        let dispatcher = Arc::new(Dispatcher::new(transport, Duration::from_secs(5)));

        let call = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.send("Debugger.enable", None, None).await })
        };
        browser.next_command().await.unwrap();

        assert_eq!(dispatcher.fail_all("Connection lost"), 1);
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Connection lost");
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_send_on_closed_transport_fails_fast() {
        let (transport, _rx, browser) = loopback::pair();
        browser.disconnect("bye");
        let dispatcher = Dispatcher::new(transport, Duration::from_secs(5));

        let err = tokio_test::assert_err!(dispatcher.send("Runtime.enable", None, None).await);
        assert_eq!(err.to_string(), "Connection lost");
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
