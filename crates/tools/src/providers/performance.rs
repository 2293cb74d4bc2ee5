//! Runtime metrics and navigation timing.

use cdp::CdpClient;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::result::ToolResult;
use crate::script::Script;

const TIMING: &str = r#"(args) => {
  const nav = performance.getEntriesByType('navigation')[0];
  const paint = {};
  performance.getEntriesByType('paint').forEach(p => { paint[p.name] = Math.round(p.startTime); });
  const lcp = performance.getEntriesByType('largest-contentful-paint').slice(-1)[0];
  const memory = performance.memory
    ? { usedJSHeapSize: performance.memory.usedJSHeapSize, totalJSHeapSize: performance.memory.totalJSHeapSize }
    : null;
  if (!nav) return { navigation: null, paint, memory };
  const ms = (v) => Math.round(v);
  return {
    navigation: {
      type: nav.type,
      dns: ms(nav.domainLookupEnd - nav.domainLookupStart),
      tcp: ms(nav.connectEnd - nav.connectStart),
      ttfb: ms(nav.responseStart - nav.requestStart),
      response: ms(nav.responseEnd - nav.responseStart),
      domInteractive: ms(nav.domInteractive),
      domContentLoaded: ms(nav.domContentLoadedEventEnd),
      load: ms(nav.loadEventEnd),
      transferSize: nav.transferSize
    },
    paint,
    largestContentfulPaint: lcp ? ms(lcp.startTime) : null,
    resources: performance.getEntriesByType('resource').length,
    memory
  };
}"#;

pub struct PerformanceProvider {
    tools: Vec<RegisteredTool>,
}

impl PerformanceProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "performance_get_metrics",
                "Chrome runtime metrics (heap, nodes, layouts, script duration)",
                |client, _args: NoArgs, session| async move {
                    const CONTEXT: &str = "Error reading metrics";
                    if let Err(e) = client.ensure_domain(Some(&session), "Performance").await {
                        return ToolResult::from_cdp_error_in(Some(CONTEXT), &e);
                    }
                    let result = client
                        .send("Performance.getMetrics", None, Some(&session))
                        .await
                        .map(|r| json!({ "metrics": metrics_map(&r["metrics"]) }));
                    ToolResult::from_cdp_result(CONTEXT, result)
                },
            )
            .add(
                "performance_get_timing",
                "Navigation, paint and memory timing from the Performance API",
                |client, _args: NoArgs, session| async move {
                    Script::function(TIMING, &json!({}))
                        .context("Error reading timing")
                        .run(&client, &session)
                        .await
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(PerformanceProvider, "performance");

/// `[{name, value}]` -> `{name: value}`
fn metrics_map(metrics: &Value) -> Value {
    let map: Map<String, Value> = metrics
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|m| Some((m["name"].as_str()?.to_string(), m["value"].clone())))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_map() {
        let metrics = json!([
            { "name": "Nodes", "value": 120 },
            { "name": "JSHeapUsedSize", "value": 1048576 },
            { "value": 3 }
        ]);
        assert_eq!(
            metrics_map(&metrics),
            json!({ "Nodes": 120, "JSHeapUsedSize": 1048576 })
        );
        assert_eq!(metrics_map(&Value::Null), json!({}));
    }
}
