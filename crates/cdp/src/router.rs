//! Event Router - fan-out of CDP events to subscribers
//!
//! Each subscription owns an unbounded queue. The read loop only enqueues,
//! so a slow listener never stalls the socket or its neighbours. A listener
//! runs on its own task and sees its events in wire order. Listeners that
//! care about the order *between* methods (paused vs resumed, socket created
//! vs frame) subscribe them together with `on_many`/`stream_many`, which
//! share one queue.

use dashmap::DashMap;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{CdpEvent, SessionId};

/// Event listener callback
pub type EventListener = Arc<dyn Fn(CdpEvent) + Send + Sync>;

/// Identifies one registration. Returned to callers so they can cancel it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionHandle {
    pub id: Uuid,
    pub method: String,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

struct Subscription {
    id: Uuid,
    /// `None` matches every session
    session_id: Option<SessionId>,
    tx: mpsc::UnboundedSender<CdpEvent>,
}

impl Subscription {
    fn matches(&self, session_id: Option<&str>) -> bool {
        match &self.session_id {
            None => true,
            Some(wanted) => session_id == Some(wanted.as_str()),
        }
    }
}

#[derive(Default)]
pub struct EventRouter {
    /// Key: method name (e.g., "Fetch.requestPaused"), in registration order
    subscriptions: DashMap<String, Vec<Subscription>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. The callback runs on a dedicated task; a panic
    /// inside it is logged and the next event is still delivered.
    pub fn on(
        &self,
        method: impl Into<String>,
        session_id: Option<SessionId>,
        listener: EventListener,
    ) -> SubscriptionHandle {
        let (handle, rx) = self.stream(method, session_id);
        spawn_listener(rx, handle.method.clone(), listener);
        handle
    }

    /// One callback for several methods, fed from a single queue so events
    /// reach it in wire order across all of them. Returns one handle per
    /// method.
    pub fn on_many(
        &self,
        methods: &[&str],
        session_id: Option<SessionId>,
        listener: EventListener,
    ) -> Vec<SubscriptionHandle> {
        let (handles, rx) = self.stream_many(methods, session_id);
        spawn_listener(rx, methods.join(","), listener);
        handles
    }

    /// Register a queue instead of a callback. Dropping the receiver is
    /// equivalent to `off` on the next matching event.
    pub fn stream(
        &self,
        method: impl Into<String>,
        session_id: Option<SessionId>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<CdpEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.subscribe(method.into(), session_id, tx), rx)
    }

    /// `stream` over several methods sharing one receiver.
    pub fn stream_many(
        &self,
        methods: &[&str],
        session_id: Option<SessionId>,
    ) -> (Vec<SubscriptionHandle>, mpsc::UnboundedReceiver<CdpEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handles = methods
            .iter()
            .map(|method| self.subscribe(method.to_string(), session_id.clone(), tx.clone()))
            .collect();
        (handles, rx)
    }

    fn subscribe(
        &self,
        method: String,
        session_id: Option<SessionId>,
        tx: mpsc::UnboundedSender<CdpEvent>,
    ) -> SubscriptionHandle {
        let id = Uuid::now_v7();
        self.subscriptions
            .entry(method.clone())
            .or_default()
            .push(Subscription {
                id,
                session_id: session_id.clone(),
                tx,
            });

        tracing::debug!("Subscribed {} to {} (session {:?})", id, method, session_id);
        SubscriptionHandle {
            id,
            method,
            session_id,
        }
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn off(&self, handle: &SubscriptionHandle) -> bool {
        let mut removed = false;
        if let Some(mut subs) = self.subscriptions.get_mut(&handle.method) {
            let before = subs.len();
            subs.retain(|s| s.id != handle.id);
            removed = subs.len() != before;
        }
        self.subscriptions
            .remove_if(&handle.method, |_, subs| subs.is_empty());
        removed
    }

    /// Drop every registration scoped to `session_id`. Wildcard
    /// subscriptions survive.
    pub fn off_session(&self, session_id: &str) -> usize {
        let mut removed = 0;
        for mut entry in self.subscriptions.iter_mut() {
            let before = entry.len();
            entry.retain(|s| s.session_id.as_deref() != Some(session_id));
            removed += before - entry.len();
        }
        self.subscriptions.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Number of live registrations for `method`.
    pub fn listener_count(&self, method: &str) -> usize {
        self.subscriptions.get(method).map(|s| s.len()).unwrap_or(0)
    }

    /// Enqueue `event` for every matching subscriber, in registration order.
    ///
    /// Never blocks. Subscribers whose receiver has been dropped are pruned.
    pub fn dispatch(&self, event: &CdpEvent) -> usize {
        let mut delivered = 0;
        let mut dead = false;

        if let Some(subs) = self.subscriptions.get(&event.method) {
            for sub in subs.iter() {
                if !sub.matches(event.session_id.as_deref()) {
                    continue;
                }
                if sub.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead = true;
                }
            }
        }

        if dead {
            if let Some(mut subs) = self.subscriptions.get_mut(&event.method) {
                subs.retain(|s| !s.tx.is_closed());
            }
            self.subscriptions
                .remove_if(&event.method, |_, subs| subs.is_empty());
        }

        delivered
    }

    /// Wait for the next `method` event on `session_id`.
    pub async fn next_event(
        &self,
        method: &str,
        session_id: Option<SessionId>,
        timeout: Duration,
    ) -> Option<CdpEvent> {
        let (handle, mut rx) = self.stream(method, session_id);
        let event = tokio::time::timeout(timeout, rx.recv()).await.ok().flatten();
        self.off(&handle);
        event
    }
}

/// Drain `rx` into `listener` on a dedicated task.
fn spawn_listener(
    mut rx: mpsc::UnboundedReceiver<CdpEvent>,
    label: String,
    listener: EventListener,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let listener = listener.clone();
            if std::panic::catch_unwind(AssertUnwindSafe(move || listener(event))).is_err() {
                tracing::error!("Event listener for {} panicked", label);
            }
        }
    });
}
