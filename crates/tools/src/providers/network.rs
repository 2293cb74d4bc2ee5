//! Network inspection and request interception.
//!
//! Interception is rule based. Each mock/block/header rule gets an id; the
//! first rule for a session installs one `Fetch.requestPaused` listener and
//! enables the Fetch domain. Paused requests go to the first matching rule
//! in registration order; unmatched requests are continued untouched.
//! Removing the last rule unsubscribes and disables Fetch.

use base64::Engine;
use cdp::{CdpClient, CdpError, CdpEvent, Dispatcher, SessionId, SubscriptionHandle};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::capture::epoch_millis;
use crate::cleanup::{forget_closed_sessions, SessionScoped};
use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::result::ToolResult;
use crate::script::Script;

const RESOURCE_ENTRIES: &str = r#"(args) => {
  const entries = performance.getEntriesByType('resource')
    .filter(e => !args.filter || e.name.includes(args.filter))
    .filter(e => !args.initiatorType || e.initiatorType === args.initiatorType);
  return {
    total: entries.length,
    requests: entries.slice(-args.limit).map(e => ({
      url: e.name,
      initiatorType: e.initiatorType,
      startTime: Math.round(e.startTime),
      duration: Math.round(e.duration),
      transferSize: e.transferSize,
      status: e.responseStatus
    }))
  };
}"#;

/// What a matching rule does to a paused request.
#[derive(Debug, Clone)]
enum RuleAction {
    Mock {
        status: u16,
        body: String,
        headers: BTreeMap<String, String>,
    },
    Block {
        reason: String,
    },
    Headers {
        headers: BTreeMap<String, String>,
    },
}

#[derive(Debug)]
struct InterceptRule {
    id: String,
    pattern: String,
    matcher: Regex,
    action: RuleAction,
    created_at: u64,
    hits: AtomicU64,
}

impl InterceptRule {
    fn new(pattern: &str, action: RuleAction) -> Result<Self, regex::Error> {
        Ok(Self {
            id: format!("icpt-{}", uuid::Uuid::now_v7().simple()),
            pattern: pattern.to_string(),
            matcher: wildcard(pattern)?,
            action,
            created_at: epoch_millis(SystemTime::now()),
            hits: AtomicU64::new(0),
        })
    }

    fn describe(&self) -> Value {
        let (kind, detail) = match &self.action {
            RuleAction::Mock { status, headers, .. } => {
                ("mock", json!({ "status": status, "headers": headers }))
            }
            RuleAction::Block { reason } => ("block", json!({ "reason": reason })),
            RuleAction::Headers { headers } => ("headers", json!({ "headers": headers })),
        };
        json!({
            "interceptionId": self.id,
            "kind": kind,
            "urlPattern": self.pattern,
            "detail": detail,
            "hits": self.hits.load(Ordering::Relaxed),
            "createdAt": self.created_at,
        })
    }
}

/// `*` matches any run of characters, `?` one character. A pattern without
/// wildcards matches any URL containing it.
fn wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    if !pattern.contains(['*', '?']) {
        return Regex::new(&regex::escape(pattern));
    }
    let body = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{}$", body))
}

type RuleList = Arc<RwLock<Vec<Arc<InterceptRule>>>>;

struct SessionRules {
    handle: SubscriptionHandle,
    rules: RuleList,
}

#[derive(Default)]
struct Interceptor {
    sessions: DashMap<SessionId, SessionRules>,
}

impl Interceptor {
    /// Register rules, installing the session's listener on first use.
    async fn add(
        &self,
        client: &CdpClient,
        session: &str,
        rules: Vec<InterceptRule>,
    ) -> Result<Vec<Value>, CdpError> {
        let rules: Vec<Arc<InterceptRule>> = rules.into_iter().map(Arc::new).collect();
        let described = rules.iter().map(|r| r.describe()).collect();

        let installed = match self.sessions.entry(session.to_string()) {
            Entry::Occupied(entry) => {
                write(&entry.get().rules).extend(rules);
                false
            }
            Entry::Vacant(entry) => {
                let list: RuleList = Arc::new(RwLock::new(rules));
                let handle = client.on(
                    "Fetch.requestPaused",
                    Some(session.to_string()),
                    paused_listener(client.dispatcher().clone(), list.clone(), session.to_string()),
                );
                entry.insert(SessionRules { handle, rules: list });
                true
            }
        };

        if installed {
            let enabled = client
                .send(
                    "Fetch.enable",
                    Some(json!({ "patterns": [{ "urlPattern": "*", "requestStage": "Request" }] })),
                    Some(session),
                )
                .await;
            if let Err(e) = enabled {
                if let Some((_, removed)) = self.sessions.remove(session) {
                    client.off(&removed.handle);
                }
                return Err(e);
            }
            tracing::info!("Request interception enabled on session {}", session);
        }
        Ok(described)
    }

    fn list(&self, session: &str) -> Vec<Value> {
        self.sessions
            .get(session)
            .map(|s| read(&s.rules).iter().map(|r| r.describe()).collect())
            .unwrap_or_default()
    }

    /// Remove one rule (or all when `id` is `None`). Returns the removed
    /// ids; tears down the listener when none remain.
    async fn remove(
        &self,
        client: &CdpClient,
        session: &str,
        id: Option<&str>,
    ) -> Result<Vec<String>, CdpError> {
        let (removed, now_empty) = match self.sessions.get(session) {
            Some(entry) => {
                let mut rules = write(&entry.rules);
                let before: Vec<String> = rules.iter().map(|r| r.id.clone()).collect();
                rules.retain(|r| id.is_some_and(|id| r.id != id));
                let removed = before
                    .into_iter()
                    .filter(|b| !rules.iter().any(|r| &r.id == b))
                    .collect::<Vec<_>>();
                (removed, rules.is_empty())
            }
            None => return Ok(Vec::new()),
        };

        if now_empty {
            if let Some((_, entry)) = self.sessions.remove_if(session, |_, s| read(&s.rules).is_empty()) {
                client.off(&entry.handle);
                client.send("Fetch.disable", None, Some(session)).await?;
                tracing::info!("Request interception disabled on session {}", session);
            }
        }
        Ok(removed)
    }
}

/// The browser dropped the session and its listener with it, so there is
/// nothing to disable.
impl SessionScoped for Interceptor {
    fn forget_session(&self, session_id: &str) {
        if let Some((_, entry)) = self.sessions.remove(session_id) {
            tracing::info!(
                "Dropped {} interception(s) of closed session {}",
                read(&entry.rules).len(),
                session_id
            );
        }
    }

    fn held_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

fn read(rules: &RuleList) -> std::sync::RwLockReadGuard<'_, Vec<Arc<InterceptRule>>> {
    rules.read().unwrap_or_else(|e| e.into_inner())
}

fn write(rules: &RuleList) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<InterceptRule>>> {
    rules.write().unwrap_or_else(|e| e.into_inner())
}

/// Listener for `Fetch.requestPaused`. Holds the dispatcher, not the
/// client, so the router never keeps the client alive.
fn paused_listener(
    dispatcher: Arc<Dispatcher>,
    rules: RuleList,
    session: SessionId,
) -> cdp::EventListener {
    Arc::new(move |event: CdpEvent| {
        let url = event.params["request"]["url"].as_str().unwrap_or_default();
        let rule = read(&rules).iter().find(|r| r.matcher.is_match(url)).cloned();
        if let Some(rule) = &rule {
            rule.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Interception {} matched {}", rule.id, url);
        }
        let Some((method, params)) = resolution(rule.as_deref().map(|r| &r.action), &event.params) else {
            return;
        };

        let dispatcher = dispatcher.clone();
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.send(method, Some(params), Some(session)).await {
                tracing::warn!("{} failed: {}", method, e);
            }
        });
    })
}

/// The Fetch command that releases a paused request.
fn resolution(action: Option<&RuleAction>, paused: &Value) -> Option<(&'static str, Value)> {
    let request_id = paused["requestId"].as_str()?;
    let resolved = match action {
        None => ("Fetch.continueRequest", json!({ "requestId": request_id })),
        Some(RuleAction::Block { reason }) => (
            "Fetch.failRequest",
            json!({ "requestId": request_id, "errorReason": reason }),
        ),
        Some(RuleAction::Mock { status, body, headers }) => (
            "Fetch.fulfillRequest",
            json!({
                "requestId": request_id,
                "responseCode": status,
                "responseHeaders": header_entries(headers),
                "body": base64::engine::general_purpose::STANDARD.encode(body.as_bytes()),
            }),
        ),
        Some(RuleAction::Headers { headers }) => {
            let mut merged: BTreeMap<String, String> = paused["request"]["headers"]
                .as_object()
                .into_iter()
                .flatten()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect();
            for (name, value) in headers {
                merged.retain(|k, _| !k.eq_ignore_ascii_case(name));
                merged.insert(name.clone(), value.clone());
            }
            (
                "Fetch.continueRequest",
                json!({ "requestId": request_id, "headers": header_entries(&merged) }),
            )
        }
    };
    Some(resolved)
}

fn header_entries(headers: &BTreeMap<String, String>) -> Vec<Value> {
    headers
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect()
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetRequestsArgs {
    /// Substring of the request URL
    #[serde(default)]
    pub filter: Option<String>,
    /// fetch, xmlhttprequest, script, img ...
    #[serde(default)]
    pub initiator_type: Option<String>,
    #[serde(default = "super::default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MockArgs {
    /// `*` / `?` wildcard pattern, or a plain substring
    pub url_pattern: String,
    #[serde(default = "default_status")]
    pub status: u16,
    /// Response body; JSON values are serialized
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_status() -> u16 {
    200
}

fn default_content_type() -> String {
    "application/json".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockArgs {
    pub url_patterns: Vec<String>,
    /// CDP network error reason
    #[serde(default = "default_block_reason")]
    pub reason: String,
}

fn default_block_reason() -> String {
    "BlockedByClient".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetHeadersArgs {
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_all")]
    pub url_pattern: String,
}

fn default_all() -> String {
    "*".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StopInterceptionArgs {
    /// Rule to remove; every rule on the session when omitted
    #[serde(default)]
    pub interception_id: Option<String>,
}

pub struct NetworkProvider {
    tools: Vec<RegisteredTool>,
}

impl NetworkProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let interceptor = Arc::new(Interceptor::default());
        forget_closed_sessions(&client, &interceptor);
        let (mock, block, headers, list, stop) = (
            interceptor.clone(),
            interceptor.clone(),
            interceptor.clone(),
            interceptor.clone(),
            interceptor,
        );

        let tools = ToolSet::new(client)
            .add(
                "network_get_requests",
                "Requests the page has made, from the resource timing buffer",
                |client, args: GetRequestsArgs, session| async move {
                    Script::function(
                        RESOURCE_ENTRIES,
                        &json!({
                            "filter": args.filter,
                            "initiatorType": args.initiator_type,
                            "limit": args.limit,
                        }),
                    )
                    .context("Error reading requests")
                    .run(&client, &session)
                    .await
                },
            )
            .add(
                "network_mock_request",
                "Answer matching requests with a fixed response until stopped",
                move |client, args: MockArgs, session| {
                    let interceptor = mock.clone();
                    async move {
                        let body = match args.body {
                            Some(Value::String(s)) => s,
                            Some(other) => other.to_string(),
                            None => String::new(),
                        };
                        let mut headers = args.headers;
                        if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                            headers.insert("Content-Type".to_string(), args.content_type);
                        }
                        let action = RuleAction::Mock {
                            status: args.status,
                            body,
                            headers,
                        };
                        install(&client, &interceptor, &session, &[args.url_pattern], action).await
                    }
                },
            )
            .add(
                "network_block_requests",
                "Fail matching requests until stopped",
                move |client, args: BlockArgs, session| {
                    let interceptor = block.clone();
                    async move {
                        if args.url_patterns.is_empty() {
                            return ToolResult::error("urlPatterns must not be empty");
                        }
                        let action = RuleAction::Block { reason: args.reason };
                        install(&client, &interceptor, &session, &args.url_patterns, action).await
                    }
                },
            )
            .add(
                "network_set_headers",
                "Add or override request headers on matching requests until stopped",
                move |client, args: SetHeadersArgs, session| {
                    let interceptor = headers.clone();
                    async move {
                        if args.headers.is_empty() {
                            return ToolResult::error("headers must not be empty");
                        }
                        let action = RuleAction::Headers { headers: args.headers };
                        install(&client, &interceptor, &session, &[args.url_pattern], action).await
                    }
                },
            )
            .add(
                "network_list_interceptions",
                "Active interception rules on the session",
                move |_client, _args: NoArgs, session| {
                    let interceptor = list.clone();
                    async move {
                        let rules = interceptor.list(&session);
                        ToolResult::ok(json!({ "count": rules.len(), "interceptions": rules }))
                    }
                },
            )
            .add(
                "network_stop_interception",
                "Remove one interception rule, or all of them",
                move |client, args: StopInterceptionArgs, session| {
                    let interceptor = stop.clone();
                    async move {
                        let wanted = args.interception_id.as_deref();
                        match interceptor.remove(&client, &session, wanted).await {
                            Ok(removed) if removed.is_empty() => match wanted {
                                Some(id) => ToolResult::error(format!("Interception not found: {}", id)),
                                None => ToolResult::ok(json!({ "removed": [], "remaining": 0 })),
                            },
                            Ok(removed) => ToolResult::ok(json!({
                                "removed": removed,
                                "remaining": interceptor.list(&session).len(),
                            })),
                            Err(e) => ToolResult::from_cdp_error_in(Some("Error stopping interception"), &e),
                        }
                    }
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(NetworkProvider, "network");

async fn install(
    client: &CdpClient,
    interceptor: &Interceptor,
    session: &str,
    patterns: &[String],
    action: RuleAction,
) -> ToolResult {
    let mut rules = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        match InterceptRule::new(pattern, action.clone()) {
            Ok(rule) => rules.push(rule),
            Err(e) => return ToolResult::error(format!("Invalid URL pattern {}: {}", pattern, e)),
        }
    }
    match interceptor.add(client, session, rules).await {
        Ok(added) => ToolResult::ok(json!({ "active": true, "interceptions": added })),
        Err(e) => ToolResult::from_cdp_error_in(Some("Error enabling interception"), &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_patterns() {
        let re = wildcard("*/api/users*").unwrap();
        assert!(re.is_match("https://x.test/api/users?id=1"));
        assert!(!re.is_match("https://x.test/api/orders"));

        let re = wildcard("https://cdn.test/?.js").unwrap();
        assert!(re.is_match("https://cdn.test/a.js"));
        assert!(!re.is_match("https://cdn.test/ab.js"));

        // Plain text is a substring match, with regex characters literal
        let re = wildcard("analytics.js").unwrap();
        assert!(re.is_match("https://t.test/analytics.js?v=2"));
        assert!(!re.is_match("https://t.test/analyticsXjs"));
    }

    #[test]
    fn test_unmatched_requests_continue() {
        let paused = json!({ "requestId": "r1", "request": { "url": "https://x" } });
        let (method, params) = resolution(None, &paused).unwrap();
        assert_eq!(method, "Fetch.continueRequest");
        assert_eq!(params, json!({ "requestId": "r1" }));
        assert!(resolution(None, &json!({})).is_none());
    }

    #[test]
    fn test_mock_fulfills_with_base64_body() {
        let action = RuleAction::Mock {
            status: 201,
            body: "{\"ok\":true}".to_string(),
            headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
        };
        let (method, params) = resolution(Some(&action), &json!({ "requestId": "r2" })).unwrap();
        assert_eq!(method, "Fetch.fulfillRequest");
        assert_eq!(params["responseCode"], 201);
        assert_eq!(params["body"], "eyJvayI6dHJ1ZX0=");
        assert_eq!(
            params["responseHeaders"],
            json!([{ "name": "Content-Type", "value": "application/json" }])
        );
    }

    #[test]
    fn test_header_rewrite_overrides_case_insensitively() {
        let action = RuleAction::Headers {
            headers: BTreeMap::from([("Authorization".to_string(), "Bearer t".to_string())]),
        };
        let paused = json!({
            "requestId": "r3",
            "request": { "url": "https://x", "headers": { "authorization": "old", "Accept": "*/*" } }
        });
        let (method, params) = resolution(Some(&action), &paused).unwrap();
        assert_eq!(method, "Fetch.continueRequest");
        assert_eq!(
            params["headers"],
            json!([
                { "name": "Accept", "value": "*/*" },
                { "name": "Authorization", "value": "Bearer t" }
            ])
        );
    }

    #[test]
    fn test_block_fails_request() {
        let action = RuleAction::Block {
            reason: "BlockedByClient".to_string(),
        };
        let (method, params) = resolution(Some(&action), &json!({ "requestId": "r4" })).unwrap();
        assert_eq!(method, "Fetch.failRequest");
        assert_eq!(params["errorReason"], "BlockedByClient");
    }
}
