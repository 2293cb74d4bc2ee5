//! Tool providers over the CDP client.
//!
//! Every tool follows the same contract: typed arguments, session
//! resolution, one or more CDP round-trips, and a uniform [`ToolResult`].
//! The [`ToolRegistry`] aggregates providers for the MCP layer.

pub mod capture;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod result;
pub mod screenshot_store;
pub mod script;

pub use config::ToolsConfig;
pub use error::{Result, ToolError};
pub use provider::{
    NoArgs, RegisteredTool, ToolContext, ToolHandler, ToolMetadata, ToolProvider, ToolSet,
};
pub use registry::ToolRegistry;
pub use result::ToolResult;
pub use screenshot_store::{FsScreenshotStore, ScreenshotMetadata, ScreenshotStore};
pub use script::Script;
