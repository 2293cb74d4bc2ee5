//! Providers that keep state across calls or issue more than one command.

mod common;

use cdp::transport::loopback::{self, Reply};
use cdp::{CdpClient, ClientConfig};
use common::{evaluates_to, settle, Gateway};
use serde_json::json;
use std::sync::Arc;
use tools::providers::ScreenshotProvider;
use tools::{FsScreenshotStore, ScreenshotStore, ToolContext, ToolProvider};

#[tokio::test]
async fn test_console_capture_lifecycle() {
    let mut gateway = Gateway::new(evaluates_to(json!({})));

    let result = gateway.call("console_get_logs", json!({})).await;
    assert!(result.error.unwrap().contains("console_start_capture"));

    let started = gateway.call("console_start_capture", json!({})).await;
    assert!(started.success);
    assert_eq!(started.data.unwrap()["capturing"], true);
    gateway.expect_command("Runtime.enable").await;

    let again = gateway.call("console_start_capture", json!({})).await;
    assert_eq!(again.warnings.len(), 1);

    gateway.peer.emit(
        "Runtime.consoleAPICalled",
        json!({ "type": "error", "timestamp": 1.0, "args": [{ "type": "string", "value": "boom" }] }),
        Some("S1"),
    );
    gateway.peer.emit(
        "Runtime.consoleAPICalled",
        json!({ "type": "log", "timestamp": 2.0, "args": [{ "type": "string", "value": "hello" }] }),
        Some("S1"),
    );
    // Other sessions are not captured
    gateway.peer.emit(
        "Runtime.consoleAPICalled",
        json!({ "type": "log", "args": [{ "type": "string", "value": "elsewhere" }] }),
        Some("S2"),
    );
    settle().await;

    let logs = gateway.call("console_get_logs", json!({})).await.data.unwrap();
    assert_eq!(logs["count"], 2);
    assert_eq!(logs["logs"][0]["text"], "boom");

    let errors = gateway
        .call("console_get_logs", json!({ "level": "error" }))
        .await
        .data
        .unwrap();
    assert_eq!(errors["count"], 1);

    let stopped = gateway.call("console_stop_capture", json!({})).await;
    assert_eq!(stopped.data.unwrap()["discarded"], 2);
    assert_eq!(gateway.client.router().listener_count("Runtime.consoleAPICalled"), 0);
}

#[tokio::test]
async fn test_mock_rule_fulfills_then_stops() {
    let mut gateway = Gateway::new(evaluates_to(json!({})));

    let mocked = gateway
        .call(
            "network_mock_request",
            json!({ "urlPattern": "*/api/user*", "status": 418, "body": { "name": "Ada" } }),
        )
        .await;
    assert!(mocked.success, "{:?}", mocked.error);
    let id = mocked.data.unwrap()["interceptions"][0]["interceptionId"]
        .as_str()
        .unwrap()
        .to_string();
    gateway.expect_command("Fetch.enable").await;

    gateway.peer.emit(
        "Fetch.requestPaused",
        json!({ "requestId": "r1", "request": { "url": "https://app.test/api/user/1" } }),
        Some("S1"),
    );
    let fulfilled = gateway.expect_command("Fetch.fulfillRequest").await;
    let params = fulfilled.params.unwrap();
    assert_eq!(params["requestId"], "r1");
    assert_eq!(params["responseCode"], 418);

    gateway.peer.emit(
        "Fetch.requestPaused",
        json!({ "requestId": "r2", "request": { "url": "https://app.test/index.html" } }),
        Some("S1"),
    );
    let continued = gateway.expect_command("Fetch.continueRequest").await;
    assert_eq!(continued.params.unwrap()["requestId"], "r2");

    let listed = gateway.call("network_list_interceptions", json!({})).await;
    let listed = listed.data.unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["interceptions"][0]["hits"], 1);

    let stopped = gateway
        .call("network_stop_interception", json!({ "interceptionId": id }))
        .await;
    assert!(stopped.success);
    gateway.expect_command("Fetch.disable").await;
    assert_eq!(gateway.client.router().listener_count("Fetch.requestPaused"), 0);

    let missing = gateway
        .call("network_stop_interception", json!({ "interceptionId": id }))
        .await;
    assert_eq!(missing.error, Some(format!("Interception not found: {}", id)));
}

#[tokio::test]
async fn test_first_matching_rule_wins() {
    let mut gateway = Gateway::new(evaluates_to(json!({})));

    let blocked = gateway
        .call("network_block_requests", json!({ "urlPatterns": ["*.png", "*ads*"] }))
        .await;
    assert_eq!(blocked.data.unwrap()["interceptions"].as_array().unwrap().len(), 2);
    gateway
        .call(
            "network_set_headers",
            json!({ "headers": { "X-Debug": "1" } }),
        )
        .await;

    // Only one listener and one Fetch.enable for the session
    assert_eq!(gateway.client.router().listener_count("Fetch.requestPaused"), 1);
    gateway.expect_command("Fetch.enable").await;

    gateway.peer.emit(
        "Fetch.requestPaused",
        json!({ "requestId": "img", "request": { "url": "https://x.test/logo.png", "headers": {} } }),
        Some("S1"),
    );
    let failed = gateway.expect_command("Fetch.failRequest").await;
    assert_eq!(failed.params.unwrap()["errorReason"], "BlockedByClient");

    gateway.peer.emit(
        "Fetch.requestPaused",
        json!({ "requestId": "doc", "request": { "url": "https://x.test/", "headers": { "Accept": "*/*" } } }),
        Some("S1"),
    );
    let rewritten = gateway.expect_command("Fetch.continueRequest").await;
    let headers = rewritten.params.unwrap()["headers"].clone();
    assert!(headers
        .as_array()
        .unwrap()
        .contains(&json!({ "name": "X-Debug", "value": "1" })));

    // Stop everything at once
    let stopped = gateway.call("network_stop_interception", json!({})).await;
    assert_eq!(stopped.data.unwrap()["removed"].as_array().unwrap().len(), 3);
    gateway.expect_command("Fetch.disable").await;
}

#[tokio::test]
async fn test_debugger_tracks_pause_state() {
    let mut gateway = Gateway::new(|request| match request.method.as_str() {
        "Debugger.evaluateOnCallFrame" => Reply::Result(json!({ "result": { "type": "number", "value": 3 } })),
        _ => Reply::ok(),
    });

    let state = gateway.call("debugger_get_paused_state", json!({})).await;
    assert_eq!(state.data.unwrap(), json!({ "paused": false }));
    gateway.expect_command("Debugger.enable").await;

    let resume = gateway.call("debugger_resume", json!({})).await;
    assert_eq!(resume.error.as_deref(), Some("Debugger is not paused"));

    gateway.peer.emit(
        "Debugger.paused",
        json!({
            "reason": "breakpoint",
            "callFrames": [{
                "callFrameId": "frame-0",
                "functionName": "render",
                "url": "app.js",
                "location": { "scriptId": "1", "lineNumber": 41, "columnNumber": 4 }
            }]
        }),
        Some("S1"),
    );
    settle().await;

    let state = gateway.call("debugger_get_paused_state", json!({})).await.data.unwrap();
    assert_eq!(state["paused"], true);
    assert_eq!(state["callFrames"][0]["lineNumber"], 42);

    let evaluated = gateway
        .call("debugger_evaluate_on_frame", json!({ "expression": "a + b" }))
        .await;
    assert_eq!(evaluated.data.unwrap()["value"], 3);
    let request = gateway.expect_command("Debugger.evaluateOnCallFrame").await;
    assert_eq!(request.params.unwrap()["callFrameId"], "frame-0");

    let resumed = gateway.call("debugger_resume", json!({})).await;
    assert!(resumed.success);
    gateway.expect_command("Debugger.resume").await;

    gateway.peer.emit("Debugger.resumed", json!({}), Some("S1"));
    settle().await;
    let state = gateway.call("debugger_get_paused_state", json!({})).await;
    assert_eq!(state.data.unwrap()["paused"], false);
}

#[tokio::test]
async fn test_breakpoint_lines_are_one_based() {
    let mut gateway = Gateway::new(|request| match request.method.as_str() {
        "Debugger.setBreakpointByUrl" => Reply::Result(json!({
            "breakpointId": "1:9:0:app.js",
            "locations": [{ "scriptId": "1", "lineNumber": 9, "columnNumber": 0 }]
        })),
        _ => Reply::ok(),
    });

    let missing = gateway
        .call("debugger_set_breakpoint", json!({ "lineNumber": 10 }))
        .await;
    assert_eq!(missing.error.as_deref(), Some("Either url or urlRegex is required"));

    let set = gateway
        .call("debugger_set_breakpoint", json!({ "url": "app.js", "lineNumber": 10 }))
        .await;
    let data = set.data.unwrap();
    assert_eq!(data["breakpointId"], "1:9:0:app.js");
    assert_eq!(data["resolved"], 1);

    let request = gateway.expect_command("Debugger.setBreakpointByUrl").await;
    assert_eq!(request.params.unwrap()["lineNumber"], 9);
}

#[tokio::test]
async fn test_websocket_frames_are_buffered() {
    let gateway = Gateway::new(evaluates_to(json!({})));

    assert!(gateway.call("websocket_start_capture", json!({})).await.success);
    gateway.peer.emit(
        "Network.webSocketCreated",
        json!({ "requestId": "ws1", "url": "wss://chat.test/socket" }),
        Some("S1"),
    );
    gateway.peer.emit(
        "Network.webSocketFrameSent",
        json!({ "requestId": "ws1", "timestamp": 1.0, "response": { "opcode": 1, "payloadData": "ping" } }),
        Some("S1"),
    );
    gateway.peer.emit(
        "Network.webSocketFrameReceived",
        json!({ "requestId": "ws1", "timestamp": 2.0, "response": { "opcode": 1, "payloadData": "pong" } }),
        Some("S1"),
    );
    settle().await;

    let received = gateway
        .call("websocket_get_frames", json!({ "direction": "received" }))
        .await
        .data
        .unwrap();
    assert_eq!(received["count"], 1);
    assert_eq!(received["frames"][0]["payload"], "pong");
    assert_eq!(received["frames"][0]["url"], "wss://chat.test/socket");

    assert!(gateway.call("websocket_stop_capture", json!({})).await.success);
    let after = gateway.call("websocket_get_frames", json!({})).await;
    assert!(!after.success);
}

#[tokio::test]
async fn test_graphql_operations_are_captured() {
    let gateway = Gateway::new(evaluates_to(json!({})));

    assert!(gateway.call("graphql_start_capture", json!({})).await.success);
    let body = json!({ "query": "query GetTodos { todos { id } }", "variables": { "first": 5 } });
    gateway.peer.emit(
        "Network.requestWillBeSent",
        json!({
            "requestId": "g1",
            "timestamp": 1.0,
            "request": { "url": "https://api.test/graphql", "method": "POST", "postData": body.to_string() }
        }),
        Some("S1"),
    );
    gateway.peer.emit(
        "Network.requestWillBeSent",
        json!({ "requestId": "g2", "request": { "url": "https://api.test/app.js", "method": "GET" } }),
        Some("S1"),
    );
    settle().await;

    let ops = gateway
        .call("graphql_get_operations", json!({ "operationType": "query" }))
        .await
        .data
        .unwrap();
    assert_eq!(ops["count"], 1);
    assert_eq!(ops["operations"][0]["operationName"], "GetTodos");
    assert_eq!(ops["operations"][0]["variables"], json!({ "first": 5 }));
}

#[tokio::test]
async fn test_page_attach_and_navigate() {
    let mut gateway = Gateway::new(|request| match request.method.as_str() {
        "Target.getTargets" => Reply::Result(json!({ "targetInfos": [
            { "targetId": "W", "type": "service_worker", "title": "", "url": "" },
            { "targetId": "P", "type": "page", "title": "App", "url": "https://app.test" }
        ] })),
        "Target.attachToTarget" => Reply::Result(json!({ "sessionId": "S9" })),
        "Page.navigate" => Reply::Result(json!({ "frameId": "F", "loaderId": "L" })),
        _ => Reply::ok(),
    });

    let attached = gateway.call("page_attach", json!({})).await;
    assert_eq!(attached.data.unwrap(), json!({ "sessionId": "S9", "targetId": "P" }));

    let targets = gateway.call("page_list_targets", json!({})).await.data.unwrap();
    assert_eq!(targets["targets"].as_array().unwrap().len(), 2);
    assert_eq!(targets["sessions"].as_array().unwrap().len(), 3);

    let peer = gateway.peer.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        peer.emit("Page.loadEventFired", json!({ "timestamp": 1.0 }), Some("S1"));
    });
    let navigated = gateway
        .call("page_navigate", json!({ "url": "https://app.test/next" }))
        .await;
    let data = navigated.data.unwrap();
    assert_eq!(data["loaded"], true);
    assert_eq!(data["frameId"], "F");
    gateway.expect_command("Page.enable").await;
    assert_eq!(gateway.client.router().listener_count("Page.loadEventFired"), 0);
}

#[tokio::test]
async fn test_navigation_error_is_a_failure() {
    let gateway = Gateway::new(|request| match request.method.as_str() {
        "Page.navigate" => Reply::Result(json!({ "frameId": "F", "errorText": "net::ERR_NAME_NOT_RESOLVED" })),
        _ => Reply::ok(),
    });

    let result = gateway
        .call("page_navigate", json!({ "url": "https://nope.invalid", "waitForLoad": false }))
        .await;
    assert_eq!(
        result.error.as_deref(),
        Some("Navigation failed: net::ERR_NAME_NOT_RESOLVED")
    );
    assert_eq!(result.data.unwrap()["frameId"], "F");
}

#[tokio::test]
async fn test_dom_click_dispatches_mouse_events() {
    let mut gateway = Gateway::new(evaluates_to(json!({ "x": 15.0, "y": 25.0, "tag": "button" })));

    let clicked = gateway.call("dom_click", json!({ "selector": "#go" })).await;
    assert!(clicked.success);
    assert_eq!(clicked.data.unwrap()["tag"], "button");

    let pressed = gateway.expect_command("Input.dispatchMouseEvent").await;
    assert_eq!(pressed.params.unwrap()["type"], "mousePressed");
    let released = gateway.expect_command("Input.dispatchMouseEvent").await;
    let released = released.params.unwrap();
    assert_eq!(released["type"], "mouseReleased");
    assert_eq!(released["x"], 15.0);
}

#[tokio::test]
async fn test_storage_and_performance_commands() {
    let gateway = Gateway::new(|request| match request.method.as_str() {
        "Network.getCookies" => Reply::Result(json!({ "cookies": [
            { "name": "sid", "value": "abc" },
            { "name": "theme", "value": "dark" }
        ] })),
        "Performance.getMetrics" => Reply::Result(json!({ "metrics": [
            { "name": "Nodes", "value": 42 }
        ] })),
        "Runtime.evaluate" => Reply::value(json!({ "local": 2, "session": 1 })),
        _ => Reply::ok(),
    });

    let cookies = gateway
        .call("storage_get_cookies", json!({ "name": "sid" }))
        .await
        .data
        .unwrap();
    assert_eq!(cookies["count"], 1);

    let cleared = gateway.call("storage_clear", json!({})).await.data.unwrap();
    assert_eq!(
        cleared,
        json!({ "cleared": { "local": 2, "session": 1, "cookies": true } })
    );

    let metrics = gateway.call("performance_get_metrics", json!({})).await.data.unwrap();
    assert_eq!(metrics["metrics"]["Nodes"], 42);
}

#[tokio::test]
async fn test_screenshot_inline_and_stored() {
    let (transport, inbound, browser) = loopback::pair();
    let client = CdpClient::with_transport(transport, inbound, ClientConfig::default());
    client.sessions().register("S1".into(), "T1".into());
    browser.serve(|request, _| match request.method.as_str() {
        "Page.captureScreenshot" => Reply::Result(json!({ "data": "aGk=" })),
        _ => Reply::ok(),
    });

    let inline = ScreenshotProvider::new(client.clone(), None);
    let handler = inline.get_handler("screenshot_capture").unwrap();
    let result = handler(json!({}), ToolContext::default()).await;
    let data = result.data.unwrap();
    assert_eq!(data["data"], "aGk=");
    assert_eq!(data["mimeType"], "image/png");

    let dir = std::env::temp_dir().join(format!("shots-{}", uuid::Uuid::now_v7()));
    let store: Arc<dyn ScreenshotStore> = Arc::new(FsScreenshotStore::new(&dir));
    let stored = ScreenshotProvider::new(client, Some(store));
    let handler = stored.get_handler("screenshot_capture").unwrap();
    let result = handler(json!({ "format": "jpeg", "quality": 80 }), ToolContext::default()).await;
    let data = result.data.unwrap();
    let url = data["url"].as_str().unwrap();
    assert!(url.starts_with("file://"));
    assert!(url.ends_with(".jpg"));
    assert_eq!(data["bytes"], 2);

    let path = url.trim_start_matches("file://");
    assert_eq!(tokio::fs::read(path).await.unwrap(), b"hi".to_vec());
    tokio::fs::remove_dir_all(&dir).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_state_follows_wire_order() {
    let gateway = Gateway::new(|_| Reply::ok());
    assert!(gateway.call("debugger_get_paused_state", json!({})).await.success);

    for n in 0..20 {
        gateway.peer.emit("Debugger.resumed", json!({}), Some("S1"));
        gateway.peer.emit(
            "Debugger.paused",
            json!({
                "reason": "step",
                "callFrames": [{
                    "callFrameId": format!("frame-{}", n),
                    "functionName": "tick",
                    "url": "app.js",
                    "location": { "scriptId": "1", "lineNumber": n, "columnNumber": 0 }
                }]
            }),
            Some("S1"),
        );
        settle().await;

        let state = gateway.call("debugger_get_paused_state", json!({})).await.data.unwrap();
        assert_eq!(state["paused"], true, "iteration {}", n);
        assert_eq!(state["callFrames"][0]["lineNumber"], n + 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_websocket_frames_keep_their_url() {
    let gateway = Gateway::new(evaluates_to(json!({})));
    assert!(gateway.call("websocket_start_capture", json!({})).await.success);

    for n in 0..50 {
        gateway.peer.emit(
            "Network.webSocketCreated",
            json!({ "requestId": format!("ws{}", n), "url": format!("wss://chat.test/{}", n) }),
            Some("S1"),
        );
        gateway.peer.emit(
            "Network.webSocketFrameReceived",
            json!({
                "requestId": format!("ws{}", n),
                "timestamp": n as f64,
                "response": { "opcode": 1, "payloadData": format!("m{}", n) }
            }),
            Some("S1"),
        );
    }
    settle().await;
    settle().await;

    let frames = gateway
        .call("websocket_get_frames", json!({ "direction": "received", "limit": 100 }))
        .await
        .data
        .unwrap();
    assert_eq!(frames["count"], 50);
    for (n, frame) in frames["frames"].as_array().unwrap().iter().enumerate() {
        assert_eq!(frame["payload"], format!("m{}", n));
        assert_eq!(frame["url"], format!("wss://chat.test/{}", n));
    }
}

#[tokio::test]
async fn test_detached_session_loses_its_provider_state() {
    let mut gateway = Gateway::new(|_| Reply::ok());

    assert!(gateway.call("console_start_capture", json!({})).await.success);
    assert!(gateway.call("debugger_get_paused_state", json!({})).await.success);
    let mocked = gateway
        .call("network_mock_request", json!({ "urlPattern": "*/api/*", "body": "{}" }))
        .await;
    assert!(mocked.success, "{:?}", mocked.error);
    gateway.expect_command("Fetch.enable").await;
    gateway.peer.emit(
        "Debugger.paused",
        json!({ "reason": "other", "callFrames": [] }),
        Some("S1"),
    );
    settle().await;

    gateway.peer.emit("Target.detachedFromTarget", json!({ "sessionId": "S1" }), None);
    settle().await;
    assert!(gateway.client.session("S1").is_none());
    assert_eq!(gateway.client.router().listener_count("Fetch.requestPaused"), 0);

    // Same id again: nothing from the old attachment survives
    gateway.client.sessions().register("S1".into(), "T1".into());
    let on_s1 = json!({ "sessionId": "S1" });

    let logs = gateway.call("console_get_logs", on_s1.clone()).await;
    assert!(logs.error.unwrap().contains("not running"));

    let rules = gateway.call("network_list_interceptions", on_s1.clone()).await;
    assert_eq!(rules.data.unwrap()["count"], 0);

    let state = gateway.call("debugger_get_paused_state", on_s1).await;
    assert_eq!(state.data.unwrap()["paused"], false);
}
