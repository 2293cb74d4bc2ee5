//! Dropping per-session provider state when its session goes away.
//!
//! The client removes a closed session's event subscriptions itself; the
//! buffers, rules and trackers providers keep alongside them are dropped here,
//! driven by the client's lifecycle events.

use cdp::{CdpClient, ConnectionEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Provider state keyed by CDP session.
pub trait SessionScoped: Send + Sync + 'static {
    /// Drop everything held for `session_id`.
    fn forget_session(&self, session_id: &str);

    /// Sessions that currently have state.
    fn held_sessions(&self) -> Vec<String>;
}

/// Watch `client`'s lifecycle and prune `state` on detach and disconnect.
///
/// The watcher exits when the client is dropped or when `state` is.
pub fn forget_closed_sessions<S: SessionScoped>(client: &CdpClient, state: &Arc<S>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No tokio runtime, closed sessions will not be pruned");
        return;
    };

    let mut lifecycle = client.lifecycle();
    let registry = client.sessions().clone();
    let state = Arc::downgrade(state);

    runtime.spawn(async move {
        loop {
            let event = lifecycle.recv().await;
            let Some(live) = state.upgrade() else {
                break;
            };
            match event {
                Ok(ConnectionEvent::SessionDetached { session_id }) => {
                    live.forget_session(&session_id);
                }
                // Missed events are reconciled against the live registry
                Ok(ConnectionEvent::Disconnected { .. }) | Err(RecvError::Lagged(_)) => {
                    for session_id in live.held_sessions() {
                        if registry.get(&session_id).is_none() {
                            live.forget_session(&session_id);
                        }
                    }
                }
                Ok(_) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });
}
