//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::error::{CdpError, Result};

/// Client configuration.
///
/// Deserializes with defaults for every missing field, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub id: String,
    /// Browser-level debugger URL, e.g. `ws://localhost:9222/devtools/browser/<id>`
    pub ws_url: String,
    /// Default per-command timeout. `Runtime.evaluate` can legitimately run for
    /// seconds, so keep this generous.
    pub command_timeout_ms: u64,
    /// Attach to the first page target right after connecting
    pub auto_attach: bool,
    /// Domains enabled as soon as a session is attached
    pub default_domains: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            ws_url: "ws://localhost:9222/devtools/browser".to_string(),
            command_timeout_ms: 30_000,
            auto_attach: true,
            default_domains: vec!["Runtime".to_string()],
        }
    }
}

impl ClientConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `CDP_WS_URL`, `CDP_COMMAND_TIMEOUT_MS` and
    /// `CDP_AUTO_ATTACH`.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup("CDP_WS_URL") {
            self.ws_url = url;
        }
        if let Some(timeout) = lookup("CDP_COMMAND_TIMEOUT_MS") {
            self.command_timeout_ms = timeout
                .parse()
                .map_err(|_| CdpError::Config(format!("CDP_COMMAND_TIMEOUT_MS: {}", timeout)))?;
        }
        if let Some(flag) = lookup("CDP_AUTO_ATTACH") {
            self.auto_attach = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.ws_url)
            .map_err(|e| CdpError::Config(format!("ws_url {}: {}", self.ws_url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(CdpError::Config(format!(
                "ws_url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.command_timeout_ms == 0 {
            return Err(CdpError::Config("command_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
