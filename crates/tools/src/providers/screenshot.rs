//! Page screenshots.

use base64::Engine;
use cdp::CdpClient;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::SystemTime;

use crate::capture::epoch_millis;
use crate::provider::{RegisteredTool, ToolSet};
use crate::result::ToolResult;
use crate::screenshot_store::{ScreenshotMetadata, ScreenshotStore};
use crate::script::Script;

const CONTEXT: &str = "Error capturing screenshot";

const ELEMENT_CLIP: &str = r#"(args) => {
  let el;
  try { el = document.querySelector(args.selector); } catch (e) { return { error: 'Invalid selector: ' + args.selector }; }
  if (!el) return { error: 'Element not found: ' + args.selector };
  el.scrollIntoView({ block: 'center' });
  const r = el.getBoundingClientRect();
  if (r.width === 0 || r.height === 0) return { error: 'Element is not visible: ' + args.selector };
  return { x: r.x + scrollX, y: r.y + scrollY, width: r.width, height: r.height, url: location.href };
}"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureArgs {
    #[serde(default)]
    pub format: ImageFormat,
    /// 0-100, jpeg and webp only
    #[serde(default)]
    pub quality: Option<u8>,
    /// Capture the whole scrollable page
    #[serde(default)]
    pub full_page: bool,
    /// Capture only this element
    #[serde(default)]
    pub selector: Option<String>,
}

pub struct ScreenshotProvider {
    tools: Vec<RegisteredTool>,
}

impl ScreenshotProvider {
    pub fn new(client: Arc<CdpClient>, store: Option<Arc<dyn ScreenshotStore>>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "screenshot_capture",
                "Capture the viewport, the full page or one element",
                move |client, args: CaptureArgs, session| {
                    let store = store.clone();
                    async move { capture(&client, store.as_deref(), args, &session).await }
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(ScreenshotProvider, "screenshot");

async fn capture(
    client: &CdpClient,
    store: Option<&dyn ScreenshotStore>,
    args: CaptureArgs,
    session: &str,
) -> ToolResult {
    let mut params = json!({ "format": args.format });
    if let (Some(quality), true) = (args.quality, args.format != ImageFormat::Png) {
        params["quality"] = json!(quality.min(100));
    }

    let mut page_url = None;
    if let Some(selector) = &args.selector {
        let clip = Script::function(ELEMENT_CLIP, &json!({ "selector": selector }))
            .context(CONTEXT)
            .run(client, session)
            .await;
        let Some(rect) = clip.data.clone().filter(|_| clip.success) else {
            return clip;
        };
        page_url = rect["url"].as_str().map(String::from);
        params["clip"] = clip_from(&rect);
        params["captureBeyondViewport"] = json!(true);
    } else if args.full_page {
        match client.send("Page.getLayoutMetrics", None, Some(session)).await {
            Ok(metrics) => {
                let size = metrics
                    .get("cssContentSize")
                    .unwrap_or(&metrics["contentSize"]);
                params["clip"] = clip_from(&json!({
                    "x": 0,
                    "y": 0,
                    "width": size["width"],
                    "height": size["height"],
                }));
                params["captureBeyondViewport"] = json!(true);
            }
            Err(e) => return ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
        }
    }

    let shot = match client
        .send("Page.captureScreenshot", Some(params), Some(session))
        .await
    {
        Ok(shot) => shot,
        Err(e) => return ToolResult::from_cdp_error_in(Some(CONTEXT), &e),
    };
    let Some(encoded) = shot["data"].as_str() else {
        return ToolResult::error("Page.captureScreenshot returned no image data");
    };

    let mime_type = args.format.mime_type();
    let Some(store) = store else {
        return ToolResult::ok(json!({
            "format": args.format,
            "mimeType": mime_type,
            "encoding": "base64",
            "data": encoded,
        }));
    };

    let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => return ToolResult::error(format!("{}: invalid image data: {}", CONTEXT, e)),
    };
    let size = bytes.len();
    let key = format!("screenshot-{}.{}", uuid::Uuid::now_v7(), args.format.extension());
    let metadata = ScreenshotMetadata {
        mime_type: mime_type.to_string(),
        session_id: session.to_string(),
        captured_at: epoch_millis(SystemTime::now()),
        page_url,
    };

    match store.store(&key, bytes, metadata).await {
        Ok(url) => ToolResult::ok(json!({
            "format": args.format,
            "mimeType": mime_type,
            "url": url,
            "bytes": size,
        })),
        Err(e) => {
            tracing::warn!("Screenshot store failed: {}", e);
            ToolResult::ok(json!({
                "format": args.format,
                "mimeType": mime_type,
                "encoding": "base64",
                "data": encoded,
            }))
            .with_warning(e.to_string())
        }
    }
}

fn clip_from(rect: &Value) -> Value {
    json!({
        "x": rect["x"].as_f64().unwrap_or(0.0),
        "y": rect["y"].as_f64().unwrap_or(0.0),
        "width": rect["width"].as_f64().unwrap_or(0.0),
        "height": rect["height"].as_f64().unwrap_or(0.0),
        "scale": 1,
    })
}
