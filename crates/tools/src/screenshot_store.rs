//! Screenshot persistence seam.
//!
//! The screenshot tool hands the decoded image to a store and reports the
//! URL it gets back. Object-storage backends live outside this crate and
//! implement the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, ToolError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotMetadata {
    pub mime_type: String,
    pub session_id: String,
    pub captured_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
}

#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    /// Persist `bytes` under `key`; returns where it can be fetched.
    async fn store(&self, key: &str, bytes: Vec<u8>, metadata: ScreenshotMetadata)
        -> Result<String>;
}

/// Writes screenshots (and a JSON sidecar) into a local directory.
pub struct FsScreenshotStore {
    dir: PathBuf,
}

impl FsScreenshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ScreenshotStore for FsScreenshotStore {
    async fn store(
        &self,
        key: &str,
        bytes: Vec<u8>,
        metadata: ScreenshotMetadata,
    ) -> Result<String> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(ToolError::Storage(format!("invalid key: {:?}", key)));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(key);
        tokio::fs::write(&path, &bytes).await?;

        let sidecar = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| ToolError::Storage(e.to_string()))?;
        tokio::fs::write(self.dir.join(format!("{}.json", key)), sidecar).await?;

        tracing::debug!("Stored screenshot {} ({} bytes)", path.display(), bytes.len());
        Ok(format!("file://{}", path.display()))
    }
}
