//! Zustand stores.
//!
//! Zustand keeps no global registry, so stores are found from
//! `window.__ZUSTAND_STORES__` (name -> store) or by scanning window globals
//! for the `getState`/`setState`/`subscribe` triple.

use cdp::CdpClient;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::script::Script;

const FIND_STORES: &str = r#"
  const isStore = (s) => s && typeof s.getState === 'function'
    && typeof s.setState === 'function' && typeof s.subscribe === 'function'
    && typeof s.dispatch !== 'function';
  const stores = {};
  const exposed = window.__ZUSTAND_STORES__ || {};
  for (const [name, s] of Object.entries(exposed)) {
    if (isStore(s)) stores[name] = s;
    else if (s && isStore(s.store)) stores[name] = s.store;
  }
  for (const key of Object.keys(window)) {
    try {
      const v = window[key];
      if (!stores[key] && (isStore(v) || (typeof v === 'function' && isStore(v)))) stores[key] = v;
    } catch (e) {}
  }
"#;

const LIST_STORES: &str = r#"(args) => {
  __FIND_STORES__
  const names = Object.keys(stores);
  if (!names.length) return { available: false };
  return {
    stores: names.map(name => {
      const state = stores[name].getState();
      return { name, keys: state && typeof state === 'object' ? Object.keys(state).filter(k => typeof state[k] !== 'function') : [] };
    }),
    count: names.length
  };
}"#;

const GET_STATE: &str = r#"(args) => {
  __FIND_STORES__
  const names = Object.keys(stores);
  const name = args.storeName || (names.length === 1 ? names[0] : null);
  if (!name) return { error: names.length ? 'Multiple stores found; pass storeName' : 'No Zustand stores found', stores: names };
  const store = stores[name];
  if (!store) return { error: 'Store not found: ' + name, stores: names };
  const found = __mcp.at(store.getState(), args.path);
  if (!found.found) return { error: 'Path not found in state: ' + args.path };
  return { store: name, path: args.path || null, state: __mcp.safe(found.value, 6) };
}"#;

fn with_stores(script: &str) -> String {
    script.replace("__FIND_STORES__", FIND_STORES)
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetStateArgs {
    /// Store name; optional when the page has exactly one store
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

pub struct ZustandProvider {
    tools: Vec<RegisteredTool>,
}

impl ZustandProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "zustand_list_stores",
                "List Zustand stores reachable from the page",
                |client, _args: NoArgs, session| async move {
                    Script::function(&with_stores(LIST_STORES), &json!({}))
                        .context("Error listing stores")
                        .library("Zustand")
                        .run(&client, &session)
                        .await
                },
            )
            .add(
                "zustand_get_state",
                "Read a Zustand store's state",
                |client, args: GetStateArgs, session| async move {
                    Script::function(
                        &with_stores(GET_STATE),
                        &json!({ "storeName": args.store_name, "path": args.path }),
                    )
                    .context("Error reading store")
                    .run(&client, &session)
                    .await
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(ZustandProvider, "zustand");
