//! CDP Client - the single call surface tools use
//!
//! Design decisions:
//! 1. Single connection per browser; sessions are multiplexed over it
//! 2. One read loop owns the inbound side; it only routes, never awaits
//!    user code
//! 3. Every session-scoped method resolves the session itself, so callers
//!    can pass `None` and get the default tab
//! 4. Results come back raw. Deciding what counts as success is the tool's job.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{CdpError, Result, CONNECTION_LOST};
use crate::events::{ConnectionEvent, EventBus};
use crate::protocol::{
    exception_summary, CdpEvent, CdpMessage, EvaluateOptions, SessionId, TargetInfo,
};
use crate::router::{EventListener, EventRouter, SubscriptionHandle};
use crate::session::{Session, SessionRegistry};
use crate::transport::{Inbound, InboundRx, Transport, WsTransport};

/// State shared between the client and its read loop.
struct Inner {
    dispatcher: Arc<Dispatcher>,
    router: Arc<EventRouter>,
    sessions: Arc<SessionRegistry>,
    events: EventBus,
    connected: AtomicBool,
}

impl Inner {
    fn handle_frame(&self, text: &str) {
        tracing::trace!("CDP recv: {}", text);
        match CdpMessage::parse(text) {
            Ok(CdpMessage::Response(response)) => {
                self.dispatcher.resolve(response);
            }
            Ok(CdpMessage::Event(event)) => {
                if event.method == "Target.detachedFromTarget" {
                    if let Some(session_id) = event.params["sessionId"].as_str() {
                        self.forget_session(session_id);
                    }
                }
                self.router.dispatch(&event);
            }
            Err(e) => tracing::warn!("Failed to parse CDP frame: {}", e),
        }
    }

    fn forget_session(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            self.router.off_session(session_id);
            self.events.publish(ConnectionEvent::SessionDetached {
                session_id: session_id.to_string(),
            });
        }
    }

    /// Contain a lost connection: nothing stays pending, no session survives.
    fn shutdown(&self, reason: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        for session_id in self.sessions.clear() {
            self.router.off_session(&session_id);
        }
        let failed = self.dispatcher.fail_all(CONNECTION_LOST);
        tracing::warn!(
            "CDP connection closed ({}), failed {} pending command(s)",
            reason,
            failed
        );
        self.events.publish(ConnectionEvent::Disconnected {
            reason: reason.to_string(),
        });
    }
}

/// CDP Client - owns one transport and everything multiplexed over it
pub struct CdpClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    inner: Arc<Inner>,
    reader: JoinHandle<()>,
}

impl CdpClient {
    /// Connect over WebSocket to `config.ws_url`.
    pub async fn connect(config: ClientConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let (transport, inbound) = WsTransport::connect(&config.ws_url).await?;
        let url = config.ws_url.clone();
        let client = Self::with_transport(transport, inbound, config);
        client
            .inner
            .events
            .publish(ConnectionEvent::Connected { url: url.clone() });
        tracing::info!("Connected to {}", url);

        if client.config.auto_attach {
            match client.attach_first_page().await {
                Ok(session_id) => tracing::info!("Auto-attached session {}", session_id),
                Err(e) => tracing::warn!("Auto-attach failed: {}", e),
            }
        }
        Ok(client)
    }

    /// Build a client over an already-open transport.
    ///
    /// `inbound` must be the receiver paired with `transport`. Must be called
    /// inside a tokio runtime.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        inbound: InboundRx,
        config: ClientConfig,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Dispatcher::new(
            transport.clone(),
            config.command_timeout(),
        ));
        let inner = Arc::new(Inner {
            sessions: Arc::new(SessionRegistry::new(dispatcher.clone())),
            dispatcher,
            router: Arc::new(EventRouter::new()),
            events: EventBus::new(),
            connected: AtomicBool::new(true),
        });

        let reader = tokio::spawn(Self::read_loop(inbound, inner.clone()));

        Arc::new(Self {
            config,
            transport,
            inner,
            reader,
        })
    }

    async fn read_loop(mut inbound: InboundRx, inner: Arc<Inner>) {
        let reason = loop {
            match inbound.recv().await {
                Some(Inbound::Frame(text)) => inner.handle_frame(&text),
                Some(Inbound::Closed { reason }) => break reason,
                None => break "transport dropped".to_string(),
            }
        };
        inner.shutdown(&reason);
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst) && self.transport.is_open()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.inner.router
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.inner.sessions
    }

    /// Lifecycle events: connect, disconnect, attach, detach.
    pub fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// `explicit` if it names a live session, else the default session.
    pub fn resolve_session(&self, explicit: Option<&str>) -> Result<SessionId> {
        self.inner.sessions.resolve_session(explicit)
    }

    /// Send a session-scoped command.
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let session_id = self.resolve_session(session_id)?;
        self.inner
            .dispatcher
            .send(method, params, Some(session_id))
            .await
    }

    /// Send a session-scoped command with its own timeout.
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<Value> {
        let session_id = self.resolve_session(session_id)?;
        self.inner
            .dispatcher
            .send_with_timeout(method, params, Some(session_id), timeout)
            .await
    }

    /// Send a browser-level command (no `sessionId`), e.g. `Target.*`.
    pub async fn send_browser(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.inner.dispatcher.send(method, params, None).await
    }

    /// Enable `domain` on the session unless it already is.
    pub async fn ensure_domain(&self, session_id: Option<&str>, domain: &str) -> Result<SessionId> {
        let session_id = self.resolve_session(session_id)?;
        self.inner
            .sessions
            .ensure_domain_enabled(&session_id, domain)
            .await?;
        Ok(session_id)
    }

    pub async fn enable_runtime(&self, session_id: Option<&str>) -> Result<SessionId> {
        self.ensure_domain(session_id, "Runtime").await
    }

    /// `Runtime.evaluate` with `returnByValue` on by default.
    ///
    /// Returns the raw CDP result (`{"result": RemoteObject}`). A thrown
    /// exception becomes `CdpError::ScriptException` carrying the full
    /// `exceptionDetails`.
    pub async fn evaluate(
        &self,
        expression: &str,
        options: EvaluateOptions,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let session_id = self.enable_runtime(session_id).await?;

        let mut params = serde_json::to_value(&options)?;
        params["expression"] = json!(expression);

        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.inner.dispatcher.default_timeout());

        let result = self
            .inner
            .dispatcher
            .send_with_timeout("Runtime.evaluate", Some(params), Some(session_id), timeout)
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            return Err(CdpError::ScriptException {
                message: exception_summary(details),
                details: details.clone(),
            });
        }
        Ok(result)
    }

    /// `evaluate` and unwrap `result.value`. `undefined` becomes `null`.
    pub async fn evaluate_value(
        &self,
        expression: &str,
        options: EvaluateOptions,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let result = self.evaluate(expression, options, session_id).await?;
        Ok(result["result"]["value"].clone())
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn on(
        &self,
        method: &str,
        session_id: Option<SessionId>,
        listener: EventListener,
    ) -> SubscriptionHandle {
        self.inner.router.on(method, session_id, listener)
    }

    /// One listener over several methods, in wire order across them.
    pub fn on_many(
        &self,
        methods: &[&str],
        session_id: Option<SessionId>,
        listener: EventListener,
    ) -> Vec<SubscriptionHandle> {
        self.inner.router.on_many(methods, session_id, listener)
    }

    pub fn stream(
        &self,
        method: &str,
        session_id: Option<SessionId>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<CdpEvent>) {
        self.inner.router.stream(method, session_id)
    }

    pub fn off(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.router.off(handle)
    }

    /// Wait for the next `method` event, scoped to a session when given.
    pub async fn wait_for_event(
        &self,
        method: &str,
        session_id: Option<SessionId>,
        timeout: Duration,
    ) -> Result<CdpEvent> {
        self.inner
            .router
            .next_event(method, session_id, timeout)
            .await
            .ok_or_else(|| CdpError::Timeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    // ========================================================================
    // Targets
    // ========================================================================

    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        let result = self.send_browser("Target.getTargets", None).await?;
        Ok(serde_json::from_value(result["targetInfos"].clone())?)
    }

    /// Attach to a target, enable the configured domains, and record the
    /// session.
    pub async fn attach(&self, target_id: &str) -> Result<SessionId> {
        let session_id = self.inner.sessions.attach(target_id).await?;

        let mut failures = 0;
        for domain in &self.config.default_domains {
            if let Err(e) = self
                .inner
                .sessions
                .ensure_domain_enabled(&session_id, domain)
                .await
            {
                tracing::warn!("Failed to enable {} on {}: {}", domain, session_id, e);
                failures += 1;
            }
        }
        if failures > 0 {
            tracing::warn!(
                "Some domain enables failed: {}/{}",
                failures,
                self.config.default_domains.len()
            );
        }

        self.inner.events.publish(ConnectionEvent::SessionAttached {
            session_id: session_id.clone(),
            target_id: target_id.to_string(),
        });
        Ok(session_id)
    }

    /// Attach to the first `page` target the browser reports.
    pub async fn attach_first_page(&self) -> Result<SessionId> {
        let page = self
            .list_targets()
            .await?
            .into_iter()
            .find(TargetInfo::is_page)
            .ok_or(CdpError::NoActiveSession)?;
        self.attach(&page.target_id).await
    }

    /// Open a new tab and attach to it.
    pub async fn create_target(&self, url: &str) -> Result<SessionId> {
        let result = self
            .send_browser("Target.createTarget", Some(json!({ "url": url })))
            .await?;
        let target_id = result["targetId"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse {
                method: "Target.createTarget".into(),
                reason: "no targetId in result".into(),
            })?
            .to_string();
        self.attach(&target_id).await
    }

    pub async fn detach(&self, session_id: &str) -> Result<()> {
        let outcome = self.inner.sessions.detach(session_id).await;
        if !matches!(outcome, Err(CdpError::SessionNotFound(_))) {
            self.inner.router.off_session(session_id);
            self.inner.events.publish(ConnectionEvent::SessionDetached {
                session_id: session_id.to_string(),
            });
        }
        outcome
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.inner.sessions.get(session_id)
    }

    /// Close the connection; pending commands fail with "Connection lost".
    pub async fn close(&self) -> Result<()> {
        let outcome = self.transport.close().await;
        self.inner.shutdown("client closed");
        outcome
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
