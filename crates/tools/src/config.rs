//! Tool-layer configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, ToolError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Entries kept per capture (console, websocket, graphql)
    pub capture_capacity: usize,
    /// Where screenshots are written; inline base64 when unset
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            capture_capacity: 500,
            screenshot_dir: None,
        }
    }
}

impl ToolsConfig {
    /// Defaults overlaid with `TOOLS_CAPTURE_CAPACITY` and
    /// `TOOLS_SCREENSHOT_DIR`.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(capacity) = lookup("TOOLS_CAPTURE_CAPACITY") {
            self.capture_capacity = capacity
                .parse()
                .map_err(|_| ToolError::Config(format!("TOOLS_CAPTURE_CAPACITY: {}", capacity)))?;
        }
        if let Some(dir) = lookup("TOOLS_SCREENSHOT_DIR").filter(|d| !d.is_empty()) {
            self.screenshot_dir = Some(PathBuf::from(dir));
        }
        if self.capture_capacity == 0 {
            return Err(ToolError::Config("capture_capacity must be > 0".into()));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overlay() {
        let config = ToolsConfig::default()
            .with_env(|key| match key {
                "TOOLS_CAPTURE_CAPACITY" => Some("50".into()),
                "TOOLS_SCREENSHOT_DIR" => Some("/tmp/shots".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.capture_capacity, 50);
        assert_eq!(config.screenshot_dir, Some(PathBuf::from("/tmp/shots")));
    }

    #[test]
    fn test_rejects_bad_capacity() {
        assert!(ToolsConfig::default()
            .with_env(|k| (k == "TOOLS_CAPTURE_CAPACITY").then(|| "lots".to_string()))
            .is_err());
        assert!(ToolsConfig::default()
            .with_env(|k| (k == "TOOLS_CAPTURE_CAPACITY").then(|| "0".to_string()))
            .is_err());
    }
}
