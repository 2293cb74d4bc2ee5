//! XState machines and actors.
//!
//! Machines are found through the devtools registry (`window.__xstate__`),
//! the inspector hook, or an app-exposed `window.__XSTATE_MACHINES__` map.

use cdp::CdpClient;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::provider::{RegisteredTool, ToolSet};
use crate::script::Script;

const FIND_ACTORS: &str = r#"
  const actors = [];
  const push = (id, actor) => {
    if (!actor || actors.some(a => a.actor === actor)) return;
    actors.push({ id: String(id), actor });
  };
  const registry = window.__xstate__;
  if (registry) {
    const services = registry.services || registry.actors;
    if (services instanceof Map) services.forEach((a, id) => push(a.id || a.sessionId || id, a));
    else if (services instanceof Set) Array.from(services).forEach((a, i) => push(a.id || a.sessionId || i, a));
    else if (services) Object.entries(services).forEach(([id, a]) => push(a.id || id, a));
  }
  const exposed = window.__XSTATE_MACHINES__;
  if (exposed) Object.entries(exposed).forEach(([id, a]) => push(id, a));
  const inspected = window.__XSTATE_INSPECT__ && window.__XSTATE_INSPECT__.actors;
  if (inspected) Object.entries(inspected).forEach(([id, a]) => push(id, a));
  const snapshotOf = (actor) => {
    if (typeof actor.getSnapshot === 'function') return actor.getSnapshot();
    return actor.state || actor.snapshot || null;
  };
  const describe = (entry, withContext) => {
    const snap = snapshotOf(entry.actor) || {};
    const machine = entry.actor.machine || entry.actor.logic || {};
    const out = {
      id: entry.id,
      machineId: machine.id || null,
      state: __mcp.safe(snap.value, 6),
      status: snap.status || (entry.actor.status !== undefined ? String(entry.actor.status) : null),
    };
    if (withContext) {
      out.context = __mcp.safe(snap.context, 5);
      out.nextEvents = Array.isArray(snap.nextEvents) ? snap.nextEvents : undefined;
      out.done = snap.done === true || snap.status === 'done';
    }
    return out;
  };
"#;

const LIST_MACHINES: &str = r#"(args) => {
  __FIND_ACTORS__
  if (!window.__xstate__ && !window.__XSTATE_MACHINES__ && !window.__XSTATE_INSPECT__) {
    return { available: false };
  }
  return {
    machines: actors.map(e => describe(e, args.includeContext)),
    count: actors.length
  };
}"#;

const GET_MACHINE: &str = r#"(args) => {
  __FIND_ACTORS__
  const entry = actors.find(e => e.id === args.machineId
    || ((e.actor.machine || e.actor.logic || {}).id === args.machineId));
  if (!entry) {
    return { error: 'Machine not found: ' + args.machineId, available: actors.map(e => e.id) };
  }
  const machine = entry.actor.machine || entry.actor.logic || {};
  const states = machine.states ? Object.keys(machine.states) : [];
  return Object.assign(describe(entry, true), { states });
}"#;

const SEND_EVENT: &str = r#"(args) => {
  __FIND_ACTORS__
  const entry = actors.find(e => e.id === args.machineId
    || ((e.actor.machine || e.actor.logic || {}).id === args.machineId));
  if (!entry) {
    return { error: 'Machine not found: ' + args.machineId, available: actors.map(e => e.id) };
  }
  if (typeof entry.actor.send !== 'function') {
    return { error: 'Actor ' + entry.id + ' does not accept events' };
  }
  const before = describe(entry, false).state;
  entry.actor.send(Object.assign({ type: args.eventType }, args.payload || {}));
  const after = describe(entry, true);
  return { sent: args.eventType, previousState: before, state: after.state, context: after.context };
}"#;

fn with_finder(script: &str) -> String {
    script.replace("__FIND_ACTORS__", FIND_ACTORS)
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListMachinesArgs {
    /// Include each machine's context
    #[serde(default)]
    pub include_context: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetMachineArgs {
    /// Actor id or machine id
    pub machine_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendEventArgs {
    pub machine_id: String,
    /// Event `type`, e.g. "TOGGLE"
    pub event_type: String,
    /// Extra event fields merged next to `type`
    #[serde(default)]
    pub payload: Option<Value>,
}

pub struct XStateProvider {
    tools: Vec<RegisteredTool>,
}

impl XStateProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "xstate_list_machines",
                "List running XState machines/actors with their current state",
                |client, args: ListMachinesArgs, session| async move {
                    Script::function(
                        &with_finder(LIST_MACHINES),
                        &json!({ "includeContext": args.include_context }),
                    )
                    .context("Error listing machines")
                    .library("XState")
                    .run(&client, &session)
                    .await
                },
            )
            .add(
                "xstate_get_machine",
                "Get one machine's state, context and state nodes",
                |client, args: GetMachineArgs, session| async move {
                    Script::function(&with_finder(GET_MACHINE), &json!({ "machineId": args.machine_id }))
                        .context("Error reading machine")
                        .run(&client, &session)
                        .await
                },
            )
            .add(
                "xstate_send_event",
                "Send an event to a running machine and return the resulting state",
                |client, args: SendEventArgs, session| async move {
                    Script::function(
                        &with_finder(SEND_EVENT),
                        &json!({
                            "machineId": args.machine_id,
                            "eventType": args.event_type,
                            "payload": args.payload,
                        }),
                    )
                    .context("Error sending event")
                    .run(&client, &session)
                    .await
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(XStateProvider, "xstate");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_embed_finder() {
        for script in [LIST_MACHINES, GET_MACHINE, SEND_EVENT] {
            let full = with_finder(script);
            assert!(!full.contains("__FIND_ACTORS__"));
            assert!(full.contains("const actors = []"));
        }
    }

    #[test]
    fn test_list_args_default() {
        let args: ListMachinesArgs = serde_json::from_value(json!({})).unwrap();
        assert!(!args.include_context);
    }
}
