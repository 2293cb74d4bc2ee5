//! Redux store inspection.

use cdp::CdpClient;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::provider::{RegisteredTool, ToolSet};
use crate::script::Script;

const STORE_NOT_FOUND: &str =
    "Redux store not found. Make sure Redux DevTools is enabled or store is exposed.";

/// Locates the store and installs the action recorder once.
const FIND_STORE: &str = r#"
  const isStore = (s) => s && typeof s.getState === 'function' && typeof s.dispatch === 'function';
  let store = [window.__REDUX_STORE__, window.store, window.__store__, window.reduxStore].find(isStore);
  if (!store) {
    const root = document.querySelector('#root, #app, [data-reactroot]');
    const container = root && Object.keys(root).find(k => k.startsWith('__reactContainer$'));
    let fiber = container && root[container];
    for (let i = 0; fiber && i < 50 && !store; i++) {
      const props = fiber.memoizedProps;
      if (props && isStore(props.store)) store = props.store;
      fiber = fiber.child;
    }
  }
  if (store && !store.__mcpRecorder) {
    const log = [];
    const dispatch = store.dispatch;
    store.dispatch = function (action) {
      log.push({ type: action && action.type, payload: __mcp.safe(action && action.payload, 3), at: Date.now() });
      if (log.length > 200) log.shift();
      return dispatch.apply(this, arguments);
    };
    store.__mcpRecorder = log;
  }
"#;

const GET_STATE: &str = r#"(args) => {
  __FIND_STORE__
  if (!store) return { error: args.notFound };
  const found = __mcp.at(store.getState(), args.path);
  if (!found.found) return { error: 'Path not found in state: ' + args.path };
  return { path: args.path || null, state: __mcp.safe(found.value, args.depth) };
}"#;

const DISPATCH: &str = r#"(args) => {
  __FIND_STORE__
  if (!store) return { error: args.notFound };
  const action = Object.assign({ type: args.type }, args.payload === null ? {} : { payload: args.payload });
  store.dispatch(action);
  const state = store.getState();
  return { dispatched: action, stateKeys: state && typeof state === 'object' ? Object.keys(state) : [] };
}"#;

const GET_ACTIONS: &str = r#"(args) => {
  __FIND_STORE__
  if (!store) return { error: args.notFound };
  const actions = store.__mcpRecorder.slice(-args.limit);
  return {
    actions,
    count: actions.length,
    recordingSince: actions.length ? actions[0].at : null,
    note: 'Actions are recorded from the first Redux tool call on this page'
  };
}"#;

fn with_store(script: &str) -> String {
    script.replace("__FIND_STORE__", FIND_STORE)
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetStateArgs {
    /// Dot path into the state, e.g. "user.profile"
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_depth")]
    pub depth: u32,
}

fn default_depth() -> u32 {
    6
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchArgs {
    /// Action `type`
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetActionsArgs {
    #[serde(default = "super::default_limit")]
    pub limit: usize,
}

pub struct ReduxProvider {
    tools: Vec<RegisteredTool>,
}

impl ReduxProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "redux_get_state",
                "Read the Redux state, optionally at a dot path",
                |client, args: GetStateArgs, session| async move {
                    Script::function(
                        &with_store(GET_STATE),
                        &json!({ "path": args.path, "depth": args.depth, "notFound": STORE_NOT_FOUND }),
                    )
                    .context("Error reading Redux state")
                    .run(&client, &session)
                    .await
                },
            )
            .add(
                "redux_dispatch_action",
                "Dispatch an action to the Redux store",
                |client, args: DispatchArgs, session| async move {
                    Script::function(
                        &with_store(DISPATCH),
                        &json!({
                            "type": args.action_type,
                            "payload": args.payload,
                            "notFound": STORE_NOT_FOUND,
                        }),
                    )
                    .context("Error dispatching action")
                    .run(&client, &session)
                    .await
                },
            )
            .add(
                "redux_get_actions",
                "Recently dispatched Redux actions",
                |client, args: GetActionsArgs, session| async move {
                    Script::function(
                        &with_store(GET_ACTIONS),
                        &json!({ "limit": args.limit, "notFound": STORE_NOT_FOUND }),
                    )
                    .context("Error reading actions")
                    .run(&client, &session)
                    .await
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(ReduxProvider, "redux");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_args_use_type_key() {
        let args: DispatchArgs =
            serde_json::from_value(json!({ "type": "counter/increment", "payload": 2 })).unwrap();
        assert_eq!(args.action_type, "counter/increment");
        assert_eq!(args.payload, Some(json!(2)));
    }
}
