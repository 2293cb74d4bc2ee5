//! Targets, attachment and navigation.

use cdp::{CdpClient, CdpError};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::result::ToolResult;
use crate::script::Script;

const PAGE_INFO: &str = r#"(args) => ({
  url: location.href,
  title: document.title,
  readyState: document.readyState,
  referrer: document.referrer || null,
  viewport: { width: innerWidth, height: innerHeight, devicePixelRatio: devicePixelRatio },
  scroll: { x: scrollX, y: scrollY, height: document.documentElement.scrollHeight },
  userAgent: navigator.userAgent
})"#;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttachArgs {
    /// Target to attach to; the first page when omitted
    #[serde(default)]
    pub target_id: Option<String>,
    /// Open a new tab at this URL and attach to it
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NavigateArgs {
    pub url: String,
    /// Wait for the load event before returning
    #[serde(default = "super::default_true")]
    pub wait_for_load: bool,
    #[serde(default = "default_load_timeout")]
    pub timeout_ms: u64,
}

fn default_load_timeout() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReloadArgs {
    #[serde(default)]
    pub ignore_cache: bool,
}

pub struct PageProvider {
    tools: Vec<RegisteredTool>,
}

impl PageProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add_browser(
                "page_list_targets",
                "List browser targets and the attached sessions",
                |client, _args: NoArgs| async move {
                    let targets = match client.list_targets().await {
                        Ok(targets) => targets,
                        Err(e) => return ToolResult::from_cdp_error_in(Some("Error listing targets"), &e),
                    };
                    let sessions: Vec<Value> = client
                        .sessions()
                        .sessions()
                        .into_iter()
                        .map(|s| json!({ "sessionId": s.session_id, "targetId": s.target_id }))
                        .collect();
                    ToolResult::ok(json!({ "targets": targets, "sessions": sessions }))
                },
            )
            .add_browser(
                "page_attach",
                "Attach to a target (or the first page, or a new tab) and return its session id",
                |client, args: AttachArgs| async move {
                    let attached = match (&args.target_id, &args.url) {
                        (Some(target_id), _) => client.attach(target_id).await,
                        (None, Some(url)) => client.create_target(url).await,
                        (None, None) => client.attach_first_page().await,
                    };
                    match attached {
                        Ok(session_id) => {
                            let target_id = client.session(&session_id).map(|s| s.target_id);
                            ToolResult::ok(json!({ "sessionId": session_id, "targetId": target_id }))
                        }
                        Err(CdpError::NoActiveSession) => ToolResult::error("No page target to attach to"),
                        Err(e) => ToolResult::from_cdp_error_in(Some("Error attaching to target"), &e),
                    }
                },
            )
            .add(
                "page_navigate",
                "Navigate the page to a URL",
                |client, args: NavigateArgs, session| async move { navigate(&client, args, &session).await },
            )
            .add(
                "page_reload",
                "Reload the page",
                |client, args: ReloadArgs, session| async move {
                    let result = client
                        .send(
                            "Page.reload",
                            Some(json!({ "ignoreCache": args.ignore_cache })),
                            Some(&session),
                        )
                        .await
                        .map(|_| json!({ "reloaded": true, "ignoreCache": args.ignore_cache }));
                    ToolResult::from_cdp_result("Error reloading page", result)
                },
            )
            .add(
                "page_info",
                "URL, title, ready state and viewport of the page",
                |client, _args: NoArgs, session| async move {
                    Script::function(PAGE_INFO, &json!({}))
                        .context("Error reading page info")
                        .run(&client, &session)
                        .await
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(PageProvider, "page");

async fn navigate(client: &CdpClient, args: NavigateArgs, session: &str) -> ToolResult {
    const CONTEXT: &str = "Error navigating";

    if let Err(e) = client.ensure_domain(Some(session), "Page").await {
        return ToolResult::from_cdp_error_in(Some(CONTEXT), &e);
    }

    // Subscribe before navigating so a fast load is not missed
    let mut load = args
        .wait_for_load
        .then(|| client.stream("Page.loadEventFired", Some(session.to_string())));

    let outcome = client
        .send("Page.navigate", Some(json!({ "url": args.url })), Some(session))
        .await;

    let result = match outcome {
        Ok(nav) => match nav["errorText"].as_str().filter(|t| !t.is_empty()) {
            Some(error_text) => {
                ToolResult::error_with_data(format!("Navigation failed: {}", error_text), nav.clone())
            }
            None => {
                let mut data = json!({
                    "url": args.url,
                    "frameId": nav["frameId"],
                    "loaderId": nav["loaderId"],
                });
                let mut warning = None;
                if let Some((_, rx)) = load.as_mut() {
                    let waited = Duration::from_millis(args.timeout_ms);
                    let loaded = matches!(tokio::time::timeout(waited, rx.recv()).await, Ok(Some(_)));
                    data["loaded"] = json!(loaded);
                    if !loaded {
                        warning = Some(format!("Load event not seen within {}ms", args.timeout_ms));
                    }
                }
                match warning {
                    Some(warning) => ToolResult::ok(data).with_warning(warning),
                    None => ToolResult::ok(data),
                }
            }
        },
        Err(e) => ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
    };

    if let Some((handle, _)) = &load {
        client.off(handle);
    }
    result
}
