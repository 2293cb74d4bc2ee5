//! Session Registry - attached targets and their enabled domains
//!
//! All sessions share the client's WebSocket; a session is just a
//! `sessionId` stamped onto commands. The registry remembers which
//! `<Domain>.enable` calls the browser acknowledged so tools can ask for a
//! domain on every invocation without re-sending it.

use dashmap::DashMap;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::dispatcher::Dispatcher;
use crate::error::{CdpError, Result};
use crate::protocol::{AttachToTargetResult, SessionId, TargetId};

/// One attachment to a browser target.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub target_id: TargetId,
    pub attached_at: Instant,
    pub domains_enabled: HashSet<String>,
    /// Attach order; the lowest live value is the default session
    seq: u64,
}

/// Serializes `<domain>.enable` per (session, domain).
type EnableGate = Arc<Mutex<()>>;

pub struct SessionRegistry {
    dispatcher: Arc<Dispatcher>,
    sessions: DashMap<SessionId, Session>,
    gates: DashMap<(SessionId, String), EnableGate>,
    next_seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            sessions: DashMap::new(),
            gates: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Record a session attached elsewhere (e.g. by auto-attach).
    pub fn register(&self, session_id: SessionId, target_id: TargetId) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Session {} attached to target {}", session_id, target_id);
        self.sessions.insert(
            session_id.clone(),
            Session {
                session_id,
                target_id,
                attached_at: Instant::now(),
                domains_enabled: HashSet::new(),
                seq,
            },
        );
    }

    /// `Target.attachToTarget` in flat mode and record the session.
    pub async fn attach(&self, target_id: &str) -> Result<SessionId> {
        let result = self
            .dispatcher
            .send(
                "Target.attachToTarget",
                Some(json!({ "targetId": target_id, "flatten": true })),
                None,
            )
            .await?;

        let attached: AttachToTargetResult = serde_json::from_value(result)?;
        self.register(attached.session_id.clone(), target_id.to_string());
        Ok(attached.session_id)
    }

    /// Detach in the browser and forget the session.
    pub async fn detach(&self, session_id: &str) -> Result<()> {
        if !self.sessions.contains_key(session_id) {
            return Err(CdpError::SessionNotFound(session_id.to_string()));
        }
        let outcome = self
            .dispatcher
            .send(
                "Target.detachFromTarget",
                Some(json!({ "sessionId": session_id })),
                None,
            )
            .await;
        self.remove(session_id);
        outcome.map(|_| ())
    }

    /// Forget a session without talking to the browser.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.remove(session_id).map(|(_, s)| s);
        self.gates.retain(|(sid, _), _| sid != session_id);
        if removed.is_some() {
            tracing::info!("Session {} detached", session_id);
        }
        removed
    }

    /// Forget every session. Used when the transport closes.
    pub fn clear(&self) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        self.sessions.clear();
        self.gates.clear();
        ids
    }

    /// `explicit` if given and known, otherwise the earliest attached live
    /// session.
    pub fn resolve_session(&self, explicit: Option<&str>) -> Result<SessionId> {
        if let Some(id) = explicit {
            return if self.sessions.contains_key(id) {
                Ok(id.to_string())
            } else {
                Err(CdpError::SessionNotFound(id.to_string()))
            };
        }

        self.sessions
            .iter()
            .min_by_key(|entry| entry.seq)
            .map(|entry| entry.key().clone())
            .ok_or(CdpError::NoActiveSession)
    }

    /// Send `<domain>.enable` once per session.
    ///
    /// Concurrent callers for the same domain queue behind one gate: only
    /// one enable is in flight, and nobody returns `Ok` before the browser
    /// acknowledged it. A failed enable leaves the domain unmarked, so the
    /// next caller in line tries again.
    pub async fn ensure_domain_enabled(&self, session_id: &str, domain: &str) -> Result<()> {
        if self.is_domain_enabled(session_id, domain) {
            return Ok(());
        }
        if !self.sessions.contains_key(session_id) {
            return Err(CdpError::SessionNotFound(session_id.to_string()));
        }

        let gate = self
            .gates
            .entry((session_id.to_string(), domain.to_string()))
            .or_default()
            .clone();
        let _guard = gate.lock().await;

        match self.sessions.get(session_id) {
            None => return Err(CdpError::SessionNotFound(session_id.to_string())),
            Some(session) if session.domains_enabled.contains(domain) => return Ok(()),
            Some(_) => {}
        }

        tracing::debug!("Enabling {} on session {}", domain, session_id);
        self.dispatcher
            .send(
                &format!("{}.enable", domain),
                None,
                Some(session_id.to_string()),
            )
            .await?;

        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.domains_enabled.insert(domain.to_string());
        }
        Ok(())
    }

    /// Forget that a domain is enabled, e.g. after `<domain>.disable`.
    pub fn mark_domain_disabled(&self, session_id: &str, domain: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.domains_enabled.remove(domain);
        }
    }

    pub fn is_domain_enabled(&self, session_id: &str, domain: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.domains_enabled.contains(domain))
            .unwrap_or(false)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Live sessions in attach order.
    pub fn sessions(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.sessions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.seq);
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::{self, Reply};
    use crate::protocol::CdpResponse;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Registry wired to a loopback browser whose responses are routed back
    /// by a tiny read loop.
    fn registry_with_browser(
        handler: impl FnMut(&crate::protocol::CdpRequest) -> Reply + Send + 'static,
    ) -> Arc<SessionRegistry> {
        let (transport, mut inbound, browser) = loopback::pair();
        let dispatcher = Arc::new(Dispatcher::new(transport, Duration::from_secs(2)));
        let reader = dispatcher.clone();
        tokio::spawn(async move {
            while let Some(crate::transport::Inbound::Frame(text)) = inbound.recv().await {
                if let Ok(response) = serde_json::from_str::<CdpResponse>(&text) {
                    reader.resolve(response);
                }
            }
        });
        let mut handler = handler;
        browser.serve(move |req, _| handler(req));
        Arc::new(SessionRegistry::new(dispatcher))
    }

    #[tokio::test]
    async fn test_resolve_without_sessions_fails() {
        let registry = registry_with_browser(|_| Reply::ok());
        let err = registry.resolve_session(None).unwrap_err();
        assert!(matches!(err, CdpError::NoActiveSession));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_default_session_is_first_attached() {
        let registry = registry_with_browser(|_| Reply::ok());
        registry.register("S2".into(), "T2".into());
        registry.register("S1".into(), "T1".into());

        assert_eq!(registry.resolve_session(None).unwrap(), "S2");
        assert_eq!(registry.resolve_session(Some("S1")).unwrap(), "S1");
        assert!(matches!(
            registry.resolve_session(Some("nope")),
            Err(CdpError::SessionNotFound(_))
        ));

        registry.remove("S2");
        assert_eq!(registry.resolve_session(None).unwrap(), "S1");
    }

    #[tokio::test]
    async fn test_ensure_domain_enabled_is_idempotent() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let registry = registry_with_browser(move |req| {
            log.lock().unwrap().push(req.method.clone());
            Reply::ok()
        });
        registry.register("S1".into(), "T1".into());

        registry.ensure_domain_enabled("S1", "Runtime").await.unwrap();
        registry.ensure_domain_enabled("S1", "Runtime").await.unwrap();

        assert_eq!(*sent.lock().unwrap(), vec!["Runtime.enable".to_string()]);
        assert!(registry.is_domain_enabled("S1", "Runtime"));
    }

    #[tokio::test]
    async fn test_failed_enable_is_retried_next_time() {
        let attempts = Arc::new(Mutex::new(0));
        let count = attempts.clone();
        let registry = registry_with_browser(move |_| {
            let mut n = count.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Reply::error("Debugger agent is not enabled")
            } else {
                Reply::ok()
            }
        });
        registry.register("S1".into(), "T1".into());

        assert!(registry.ensure_domain_enabled("S1", "Debugger").await.is_err());
        assert!(!registry.is_domain_enabled("S1", "Debugger"));
        registry.ensure_domain_enabled("S1", "Debugger").await.unwrap();
        assert_eq!(*attempts.lock().unwrap(), 2);
    }

    /// Registry whose browser is driven by hand from the test.
    fn registry_with_manual_browser() -> (Arc<SessionRegistry>, loopback::LoopbackBrowser) {
        let (transport, mut inbound, browser) = loopback::pair();
        let dispatcher = Arc::new(Dispatcher::new(transport, Duration::from_secs(2)));
        let reader = dispatcher.clone();
        tokio::spawn(async move {
            while let Some(crate::transport::Inbound::Frame(text)) = inbound.recv().await {
                if let Ok(response) = serde_json::from_str::<CdpResponse>(&text) {
                    reader.resolve(response);
                }
            }
        });
        (Arc::new(SessionRegistry::new(dispatcher)), browser)
    }

    fn spawn_enable(
        registry: &Arc<SessionRegistry>,
        domain: &'static str,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let registry = registry.clone();
        tokio::spawn(async move { registry.ensure_domain_enabled("S1", domain).await })
    }

    #[tokio::test]
    async fn test_concurrent_enable_waits_for_the_acknowledgement() {
        let (registry, mut browser) = registry_with_manual_browser();
        registry.register("S1".into(), "T1".into());

        let first = spawn_enable(&registry, "Debugger");
        let enable = browser.next_command().await.unwrap();
        assert_eq!(enable.method, "Debugger.enable");

        let second = spawn_enable(&registry, "Debugger");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        browser.respond(enable.id, serde_json::json!({}));
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        // Only one enable went out
        let extra = tokio::time::timeout(Duration::from_millis(30), browser.next_command()).await;
        assert!(extra.is_err());
        assert!(registry.is_domain_enabled("S1", "Debugger"));
    }

    #[tokio::test]
    async fn test_concurrent_enable_does_not_hide_a_failure() {
        let (registry, mut browser) = registry_with_manual_browser();
        registry.register("S1".into(), "T1".into());

        let first = spawn_enable(&registry, "Debugger");
        let enable = browser.next_command().await.unwrap();
        let second = spawn_enable(&registry, "Debugger");
        tokio::time::sleep(Duration::from_millis(20)).await;

        browser.respond_error(enable.id, -32000, "Debugger agent is not enabled");
        assert!(first.await.unwrap().is_err());

        // The waiting caller retries instead of assuming success
        let retry = browser.next_command().await.unwrap();
        assert_eq!(retry.method, "Debugger.enable");
        browser.respond_error(retry.id, -32000, "Debugger agent is not enabled");
        assert!(second.await.unwrap().is_err());
        assert!(!registry.is_domain_enabled("S1", "Debugger"));
    }

    #[tokio::test]
    async fn test_attach_records_session() {
        let registry = registry_with_browser(|req| match req.method.as_str() {
            "Target.attachToTarget" => Reply::Result(serde_json::json!({ "sessionId": "S9" })),
            _ => Reply::ok(),
        });

        let session_id = registry.attach("T9").await.unwrap();
        assert_eq!(session_id, "S9");
        assert_eq!(registry.get("S9").unwrap().target_id, "T9");

        registry.detach("S9").await.unwrap();
        assert!(registry.is_empty());
    }
}
