//! Loopback browser fixture shared by the integration tests.

#![allow(dead_code)]

use cdp::transport::loopback::{self, BrowserPeer, Reply};
use cdp::{CdpClient, CdpRequest, ClientConfig};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tools::{ToolContext, ToolRegistry, ToolResult, ToolsConfig};

pub struct Gateway {
    pub client: Arc<CdpClient>,
    pub registry: Arc<ToolRegistry>,
    pub peer: BrowserPeer,
    /// Every command the browser received, in order
    pub seen: mpsc::UnboundedReceiver<CdpRequest>,
}

impl Gateway {
    /// Client with sessions `S1` (default) and `S2`, answered by `reply`.
    pub fn new<F>(mut reply: F) -> Self
    where
        F: FnMut(&CdpRequest) -> Reply + Send + 'static,
    {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let (transport, inbound, browser) = loopback::pair();
        let client = CdpClient::with_transport(transport, inbound, ClientConfig::default());
        client.sessions().register("S1".into(), "T1".into());
        client.sessions().register("S2".into(), "T2".into());

        let peer = browser.peer();
        let (seen_tx, seen) = mpsc::unbounded_channel();
        browser.serve(move |request, _peer| {
            let _ = seen_tx.send(request.clone());
            reply(request)
        });

        let registry = ToolRegistry::with_defaults(client.clone(), &ToolsConfig::default())
            .expect("default providers register");

        Self {
            client,
            registry: Arc::new(registry),
            peer,
            seen,
        }
    }

    pub async fn call(&self, tool: &str, args: Value) -> ToolResult {
        self.registry.call(tool, args, ToolContext::default()).await
    }

    /// Methods received so far.
    pub fn drain_methods(&mut self) -> Vec<String> {
        let mut methods = Vec::new();
        while let Ok(request) = self.seen.try_recv() {
            methods.push(request.method);
        }
        methods
    }

    /// Wait for the next command with `method`, skipping others.
    pub async fn expect_command(&mut self, method: &str) -> CdpRequest {
        let wait = async {
            loop {
                match self.seen.recv().await {
                    Some(request) if request.method == method => return request,
                    Some(_) => continue,
                    None => panic!("browser gone while waiting for {}", method),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .unwrap_or_else(|_| panic!("no {} command", method))
    }
}

/// Answer `*.enable` and friends with `{}`, `Runtime.evaluate` with `value`.
pub fn evaluates_to(value: Value) -> impl FnMut(&CdpRequest) -> Reply + Send + 'static {
    move |request| match request.method.as_str() {
        "Runtime.evaluate" => Reply::value(value.clone()),
        _ => Reply::ok(),
    }
}

/// Let spawned listener tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
