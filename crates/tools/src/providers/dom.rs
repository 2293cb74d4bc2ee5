//! DOM queries and basic interaction.
//!
//! Reads go through in-page scripts. Clicks and typing use the Input domain
//! so the page sees trusted events.

use cdp::CdpClient;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::provider::{RegisteredTool, ToolSet};
use crate::result::ToolResult;
use crate::script::Script;

const DESCRIBE: &str = r#"
  const describe = (el) => {
    const rect = el.getBoundingClientRect();
    const style = getComputedStyle(el);
    return {
      tag: el.tagName.toLowerCase(),
      id: el.id || null,
      classes: Array.from(el.classList),
      text: (el.innerText || el.textContent || '').trim().slice(0, 200),
      visible: rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none',
      rect: { x: Math.round(rect.x), y: Math.round(rect.y), width: Math.round(rect.width), height: Math.round(rect.height) }
    };
  };
  const select = (selector, all) => {
    try { return { nodes: all ? Array.from(document.querySelectorAll(selector)) : [document.querySelector(selector)].filter(Boolean) }; }
    catch (e) { return { invalid: 'Invalid selector: ' + selector }; }
  };
"#;

const QUERY: &str = r#"(args) => {
  __DESCRIBE__
  const found = select(args.selector, true);
  if (found.invalid) return { error: found.invalid };
  return { count: found.nodes.length, elements: found.nodes.slice(0, args.limit).map(describe) };
}"#;

const GET_ELEMENT: &str = r#"(args) => {
  __DESCRIBE__
  const found = select(args.selector, false);
  if (found.invalid) return { error: found.invalid };
  const el = found.nodes[0];
  if (!el) return { error: 'Element not found: ' + args.selector };
  const attributes = {};
  for (const a of Array.from(el.attributes)) attributes[a.name] = a.value;
  const out = Object.assign(describe(el), { attributes, childCount: el.children.length });
  if ('value' in el) out.value = el.value;
  if ('checked' in el) out.checked = el.checked;
  if ('disabled' in el) out.disabled = el.disabled;
  return out;
}"#;

const GET_HTML: &str = r#"(args) => {
  __DESCRIBE__
  let el = document.documentElement;
  if (args.selector) {
    const found = select(args.selector, false);
    if (found.invalid) return { error: found.invalid };
    el = found.nodes[0];
    if (!el) return { error: 'Element not found: ' + args.selector };
  }
  const html = args.outer ? el.outerHTML : el.innerHTML;
  return { html: html.slice(0, args.maxLength), length: html.length, truncated: html.length > args.maxLength };
}"#;

const CLICK_POINT: &str = r#"(args) => {
  __DESCRIBE__
  const found = select(args.selector, false);
  if (found.invalid) return { error: found.invalid };
  const el = found.nodes[0];
  if (!el) return { error: 'Element not found: ' + args.selector };
  el.scrollIntoView({ block: 'center', inline: 'center' });
  const rect = el.getBoundingClientRect();
  if (rect.width === 0 || rect.height === 0) return { error: 'Element is not visible: ' + args.selector };
  return { x: rect.x + rect.width / 2, y: rect.y + rect.height / 2, tag: el.tagName.toLowerCase() };
}"#;

const FOCUS: &str = r#"(args) => {
  __DESCRIBE__
  const found = select(args.selector, false);
  if (found.invalid) return { error: found.invalid };
  const el = found.nodes[0];
  if (!el) return { error: 'Element not found: ' + args.selector };
  el.scrollIntoView({ block: 'center' });
  el.focus();
  if (document.activeElement !== el) return { error: 'Element cannot take focus: ' + args.selector };
  if (args.clear) {
    if ('value' in el) {
      el.value = '';
      el.dispatchEvent(new Event('input', { bubbles: true }));
    } else if (el.isContentEditable) {
      el.textContent = '';
    }
  }
  return { tag: el.tagName.toLowerCase() };
}"#;

fn with_describe(script: &str) -> String {
    script.replace("__DESCRIBE__", DESCRIBE)
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryArgs {
    /// CSS selector
    pub selector: String,
    #[serde(default = "default_elements")]
    pub limit: usize,
}

fn default_elements() -> usize {
    20
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectorArgs {
    /// CSS selector
    pub selector: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HtmlArgs {
    /// Element to read; the whole document when omitted
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default = "super::default_true")]
    pub outer: bool,
    #[serde(default = "default_html_length")]
    pub max_length: usize,
}

fn default_html_length() -> usize {
    50_000
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypeArgs {
    pub selector: String,
    pub text: String,
    /// Clear the current value first
    #[serde(default)]
    pub clear: bool,
}

pub struct DomProvider {
    tools: Vec<RegisteredTool>,
}

impl DomProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "dom_query",
                "Find elements matching a CSS selector",
                |client, args: QueryArgs, session| async move {
                    Script::function(
                        &with_describe(QUERY),
                        &json!({ "selector": args.selector, "limit": args.limit }),
                    )
                    .context("Error querying DOM")
                    .run(&client, &session)
                    .await
                },
            )
            .add(
                "dom_get_element",
                "Attributes, text, geometry and form state of one element",
                |client, args: SelectorArgs, session| async move {
                    Script::function(&with_describe(GET_ELEMENT), &json!({ "selector": args.selector }))
                        .context("Error reading element")
                        .run(&client, &session)
                        .await
                },
            )
            .add(
                "dom_get_html",
                "HTML of the document or one element",
                |client, args: HtmlArgs, session| async move {
                    Script::function(
                        &with_describe(GET_HTML),
                        &json!({
                            "selector": args.selector,
                            "outer": args.outer,
                            "maxLength": args.max_length,
                        }),
                    )
                    .context("Error reading HTML")
                    .run(&client, &session)
                    .await
                },
            )
            .add(
                "dom_click",
                "Click the center of an element",
                |client, args: SelectorArgs, session| async move { click(&client, &args.selector, &session).await },
            )
            .add(
                "dom_type",
                "Focus an element and type text into it",
                |client, args: TypeArgs, session| async move { type_text(&client, args, &session).await },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(DomProvider, "dom");

async fn click(client: &CdpClient, selector: &str, session: &str) -> ToolResult {
    const CONTEXT: &str = "Error clicking element";

    let point = Script::function(&with_describe(CLICK_POINT), &json!({ "selector": selector }))
        .context(CONTEXT)
        .run(client, session)
        .await;
    let Some(target) = point.data.clone().filter(|_| point.success) else {
        return point;
    };
    let (Some(x), Some(y)) = (target["x"].as_f64(), target["y"].as_f64()) else {
        return ToolResult::error_with_data("Element has no clickable point", target);
    };

    for event in ["mousePressed", "mouseReleased"] {
        let params = json!({
            "type": event,
            "x": x,
            "y": y,
            "button": "left",
            "clickCount": 1,
        });
        if let Err(e) = client
            .send("Input.dispatchMouseEvent", Some(params), Some(session))
            .await
        {
            return ToolResult::from_cdp_error_in(Some(CONTEXT), &e);
        }
    }

    tracing::debug!("Clicked {} at ({}, {})", selector, x, y);
    ToolResult::ok(json!({ "clicked": selector, "x": x, "y": y, "tag": target["tag"] }))
}

async fn type_text(client: &CdpClient, args: TypeArgs, session: &str) -> ToolResult {
    const CONTEXT: &str = "Error typing into element";

    let focused = Script::function(
        &with_describe(FOCUS),
        &json!({ "selector": args.selector, "clear": args.clear }),
    )
    .context(CONTEXT)
    .run(client, session)
    .await;
    if !focused.success {
        return focused;
    }

    let inserted = client
        .send(
            "Input.insertText",
            Some(json!({ "text": args.text })),
            Some(session),
        )
        .await;
    match inserted {
        Ok(_) => ToolResult::ok(json!({
            "selector": args.selector,
            "typed": args.text.chars().count(),
            "cleared": args.clear,
        })),
        Err(e) => ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
    }
}
