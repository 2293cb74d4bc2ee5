//! React fiber tree inspection via the devtools global hook.

use cdp::CdpClient;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::script::Script;

const FIBER_HELPERS: &str = r#"
  const hook = window.__REACT_DEVTOOLS_GLOBAL_HOOK__;
  const roots = [];
  if (hook && hook.getFiberRoots && hook.renderers) {
    hook.renderers.forEach((_, id) => hook.getFiberRoots(id).forEach(r => roots.push(r.current)));
  }
  if (!roots.length) {
    for (const el of document.querySelectorAll('body *')) {
      const key = Object.keys(el).find(k => k.startsWith('__reactContainer$') || k.startsWith('_reactRootContainer'));
      if (!key) continue;
      const c = el[key];
      const fiber = c && (c.current || (c._internalRoot && c._internalRoot.current) || c.stateNode && c.stateNode.current || c);
      if (fiber) roots.push(fiber);
      if (roots.length > 5) break;
    }
  }
  const nameOf = (fiber) => {
    const t = fiber.type;
    if (!t) return null;
    if (typeof t === 'string') return t;
    return t.displayName || t.name || (t.render && (t.render.displayName || t.render.name)) || null;
  };
  const isComponent = (fiber) => typeof fiber.type === 'function' || (fiber.type && typeof fiber.type === 'object');
  const hooksOf = (fiber) => {
    const out = [];
    let h = fiber.memoizedState;
    for (let i = 0; h && typeof h === 'object' && 'memoizedState' in h && i < 20; i++) {
      out.push(__mcp.safe(h.memoizedState, 3));
      h = h.next;
    }
    return out;
  };
"#;

const DETECT: &str = r#"(args) => {
  __FIBER_HELPERS__
  if (!hook && !roots.length) return { available: false };
  const renderers = [];
  if (hook && hook.renderers) hook.renderers.forEach(r => renderers.push({ version: r.version || null, packageName: r.rendererPackageName || null }));
  return {
    available: true,
    version: (renderers[0] && renderers[0].version) || (window.React && window.React.version) || null,
    renderers,
    roots: roots.length,
    devtoolsHook: !!hook
  };
}"#;

const TREE: &str = r#"(args) => {
  __FIBER_HELPERS__
  if (!roots.length) return { available: false };
  let nodes = 0;
  const walk = (fiber, depth) => {
    const children = [];
    for (let c = fiber.child; c; c = c.sibling) {
      if (nodes >= args.maxNodes) break;
      if (isComponent(c) || (args.includeHost && typeof c.type === 'string')) {
        nodes++;
        const node = { name: nameOf(c) || 'Anonymous' };
        if (args.includeProps) node.props = __mcp.safe(c.memoizedProps, 2);
        if (depth < args.maxDepth) node.children = walk(c, depth + 1);
        children.push(node);
      } else {
        children.push(...walk(c, depth));
      }
    }
    return children;
  };
  const tree = roots.map(r => ({ name: 'Root', children: walk(r, 0) }));
  return { tree, nodes, truncated: nodes >= args.maxNodes };
}"#;

const FIND: &str = r#"(args) => {
  __FIBER_HELPERS__
  if (!roots.length) return { available: false };
  const matches = [];
  const stack = roots.slice();
  const wanted = args.name.toLowerCase();
  while (stack.length && matches.length < args.limit) {
    const fiber = stack.pop();
    const name = nameOf(fiber);
    if (isComponent(fiber) && name && (args.exact ? name === args.name : name.toLowerCase().includes(wanted))) {
      const host = fiber.stateNode instanceof Element ? fiber.stateNode : null;
      matches.push({ name, props: __mcp.safe(fiber.memoizedProps, 3), state: hooksOf(fiber), key: fiber.key, element: host ? host.tagName.toLowerCase() : null });
    }
    if (fiber.sibling) stack.push(fiber.sibling);
    if (fiber.child) stack.push(fiber.child);
  }
  if (!matches.length) return { error: 'No components found matching: ' + args.name, matches: [] };
  return { matches, count: matches.length };
}"#;

fn with_helpers(script: &str) -> String {
    script.replace("__FIBER_HELPERS__", FIBER_HELPERS)
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TreeArgs {
    #[serde(default = "default_depth")]
    pub max_depth: u32,
    #[serde(default = "default_nodes")]
    pub max_nodes: u32,
    #[serde(default)]
    pub include_props: bool,
    /// Include host elements (div, span, ...)
    #[serde(default)]
    pub include_host: bool,
}

fn default_depth() -> u32 {
    8
}

fn default_nodes() -> u32 {
    300
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindArgs {
    /// Component display name, substring match unless `exact`
    pub name: String,
    #[serde(default)]
    pub exact: bool,
    #[serde(default = "default_matches")]
    pub limit: usize,
}

fn default_matches() -> usize {
    20
}

pub struct ReactProvider {
    tools: Vec<RegisteredTool>,
}

impl ReactProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "react_detect",
                "Detect React and its renderer version",
                |client, _args: NoArgs, session| async move {
                    Script::function(&with_helpers(DETECT), &json!({}))
                        .context("Error detecting React")
                        .library("React")
                        .run(&client, &session)
                        .await
                },
            )
            .add(
                "react_get_component_tree",
                "Component tree from the React fiber roots",
                |client, args: TreeArgs, session| async move {
                    Script::function(
                        &with_helpers(TREE),
                        &json!({
                            "maxDepth": args.max_depth,
                            "maxNodes": args.max_nodes,
                            "includeProps": args.include_props,
                            "includeHost": args.include_host,
                        }),
                    )
                    .context("Error reading component tree")
                    .library("React")
                    .run(&client, &session)
                    .await
                },
            )
            .add(
                "react_find_components",
                "Find components by name with their props and hook state",
                |client, args: FindArgs, session| async move {
                    Script::function(
                        &with_helpers(FIND),
                        &json!({ "name": args.name, "exact": args.exact, "limit": args.limit }),
                    )
                    .context("Error finding components")
                    .library("React")
                    .run(&client, &session)
                    .await
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(ReactProvider, "react");
