//! Aggregates providers behind one name lookup.

use cdp::CdpClient;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ToolsConfig;
use crate::error::{Result, ToolError};
use crate::provider::{ToolContext, ToolHandler, ToolMetadata, ToolProvider};
use crate::providers;
use crate::result::ToolResult;
use crate::screenshot_store::{FsScreenshotStore, ScreenshotStore};

#[derive(Default)]
pub struct ToolRegistry {
    providers: Vec<Arc<dyn ToolProvider>>,
    /// tool name -> index into `providers`
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in provider wired to `client`.
    pub fn with_defaults(client: Arc<CdpClient>, config: &ToolsConfig) -> Result<Self> {
        let store: Option<Arc<dyn ScreenshotStore>> = config
            .screenshot_dir
            .as_ref()
            .map(|dir| Arc::new(FsScreenshotStore::new(dir)) as Arc<dyn ScreenshotStore>);

        let mut registry = Self::new();
        for provider in providers::all(client, config, store) {
            registry.register(provider)?;
        }
        tracing::info!(
            "Registered {} tools from {} providers",
            registry.index.len(),
            registry.providers.len()
        );
        Ok(registry)
    }

    /// Add a provider. Fails without side effects if any of its tool names
    /// is already taken.
    pub fn register(&mut self, provider: Arc<dyn ToolProvider>) -> Result<()> {
        let names: Vec<String> = provider.list_tools().into_iter().map(|t| t.name).collect();
        for (i, name) in names.iter().enumerate() {
            if self.index.contains_key(name) || names[..i].contains(name) {
                return Err(ToolError::DuplicateTool(name.clone()));
            }
        }

        let slot = self.providers.len();
        for name in names {
            self.index.insert(name, slot);
        }
        tracing::debug!("Registered provider {}", provider.name());
        self.providers.push(provider);
        Ok(())
    }

    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.providers.iter().flat_map(|p| p.list_tools()).collect()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn get_handler(&self, name: &str) -> Option<ToolHandler> {
        let slot = *self.index.get(name)?;
        self.providers[slot].get_handler(name)
    }

    /// Run one tool. Unknown names are a failed result, not an error.
    pub async fn call(&self, name: &str, args: Value, ctx: ToolContext) -> ToolResult {
        match self.get_handler(name) {
            Some(handler) => handler(args, ctx).await,
            None => ToolResult::error(ToolError::UnknownTool(name.to_string()).to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
