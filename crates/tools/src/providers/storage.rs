//! Web storage and cookies.

use cdp::CdpClient;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::provider::{RegisteredTool, ToolSet};
use crate::result::ToolResult;
use crate::script::Script;

const GET_ITEMS: &str = r#"(args) => {
  const store = args.area === 'session' ? window.sessionStorage : window.localStorage;
  const parse = (raw) => { try { return JSON.parse(raw); } catch (e) { return raw; } };
  if (args.key) {
    const raw = store.getItem(args.key);
    if (raw === null) return { error: 'Key not found: ' + args.key };
    return { key: args.key, value: parse(raw) };
  }
  const items = {};
  for (let i = 0; i < store.length; i++) {
    const key = store.key(i);
    items[key] = parse(store.getItem(key));
  }
  return { items, count: store.length };
}"#;

const SET_ITEM: &str = r#"(args) => {
  const store = args.area === 'session' ? window.sessionStorage : window.localStorage;
  const raw = typeof args.value === 'string' ? args.value : JSON.stringify(args.value);
  const previous = store.getItem(args.key);
  store.setItem(args.key, raw);
  return { key: args.key, stored: true, previous };
}"#;

const CLEAR: &str = r#"(args) => {
  const cleared = {};
  if (args.local) { cleared.local = localStorage.length; localStorage.clear(); }
  if (args.session) { cleared.session = sessionStorage.length; sessionStorage.clear(); }
  return cleared;
}"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    #[default]
    Local,
    Session,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClearTarget {
    Local,
    Session,
    Cookies,
    #[default]
    All,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetLocalArgs {
    /// One key; every item when omitted
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub area: StorageArea,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetLocalArgs {
    pub key: String,
    /// Strings are stored as-is, anything else as JSON
    pub value: Value,
    #[serde(default)]
    pub area: StorageArea,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetCookiesArgs {
    /// Only cookies with this name
    #[serde(default)]
    pub name: Option<String>,
    /// Only cookies sent to these URLs
    #[serde(default)]
    pub urls: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClearArgs {
    #[serde(default)]
    pub target: ClearTarget,
}

pub struct StorageProvider {
    tools: Vec<RegisteredTool>,
}

impl StorageProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "storage_get_local",
                "Read localStorage or sessionStorage",
                |client, args: GetLocalArgs, session| async move {
                    Script::function(GET_ITEMS, &json!({ "key": args.key, "area": args.area }))
                        .context("Error reading storage")
                        .run(&client, &session)
                        .await
                },
            )
            .add(
                "storage_set_local",
                "Write one localStorage or sessionStorage item",
                |client, args: SetLocalArgs, session| async move {
                    Script::function(
                        SET_ITEM,
                        &json!({ "key": args.key, "value": args.value, "area": args.area }),
                    )
                    .context("Error writing storage")
                    .run(&client, &session)
                    .await
                },
            )
            .add(
                "storage_get_cookies",
                "Cookies visible to the page",
                |client, args: GetCookiesArgs, session| async move {
                    let params = args.urls.as_ref().map(|urls| json!({ "urls": urls }));
                    let result = client
                        .send("Network.getCookies", params, Some(&session))
                        .await
                        .map(|r| filter_cookies(&r["cookies"], args.name.as_deref()));
                    ToolResult::from_cdp_result("Error reading cookies", result)
                },
            )
            .add(
                "storage_clear",
                "Clear web storage and/or browser cookies",
                |client, args: ClearArgs, session| async move { clear(&client, args.target, &session).await },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(StorageProvider, "storage");

fn filter_cookies(cookies: &Value, name: Option<&str>) -> Value {
    let cookies: Vec<Value> = cookies
        .as_array()
        .into_iter()
        .flatten()
        .filter(|c| name.map_or(true, |n| c["name"] == n))
        .cloned()
        .collect();
    json!({ "count": cookies.len(), "cookies": cookies })
}

async fn clear(client: &CdpClient, target: ClearTarget, session: &str) -> ToolResult {
    let local = matches!(target, ClearTarget::Local | ClearTarget::All);
    let session_area = matches!(target, ClearTarget::Session | ClearTarget::All);
    let cookies = matches!(target, ClearTarget::Cookies | ClearTarget::All);

    let mut cleared = json!({});
    if local || session_area {
        let result = Script::function(CLEAR, &json!({ "local": local, "session": session_area }))
            .context("Error clearing storage")
            .run(client, session)
            .await;
        if !result.success {
            return result;
        }
        cleared = result.data.unwrap_or_else(|| json!({}));
    }
    if cookies {
        if let Err(e) = client
            .send("Network.clearBrowserCookies", None, Some(session))
            .await
        {
            return ToolResult::from_cdp_error_in(Some("Error clearing cookies"), &e);
        }
        cleared["cookies"] = json!(true);
    }
    ToolResult::ok(json!({ "cleared": cleared }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_cookies_by_name() {
        let cookies = json!([{ "name": "sid", "value": "1" }, { "name": "theme", "value": "dark" }]);
        let filtered = filter_cookies(&cookies, Some("theme"));
        assert_eq!(filtered["count"], 1);
        assert_eq!(filtered["cookies"][0]["value"], "dark");
        assert_eq!(filter_cookies(&cookies, None)["count"], 2);
    }

    #[test]
    fn test_area_defaults_to_local() {
        let args: GetLocalArgs = serde_json::from_value(json!({})).unwrap();
        assert_eq!(args.area, StorageArea::Local);
        let args: ClearArgs = serde_json::from_value(json!({ "target": "cookies" })).unwrap();
        assert_eq!(args.target, ClearTarget::Cookies);
    }
}
