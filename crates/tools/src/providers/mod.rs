//! Built-in tool providers.

use cdp::CdpClient;
use std::sync::Arc;

use crate::config::ToolsConfig;
use crate::provider::ToolProvider;
use crate::screenshot_store::ScreenshotStore;

/// Implements `ToolProvider` for a struct holding `tools: Vec<RegisteredTool>`.
macro_rules! tool_provider {
    ($ty:ident, $name:literal) => {
        impl crate::provider::ToolProvider for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn tools(&self) -> &[crate::provider::RegisteredTool] {
                &self.tools
            }
        }
    };
}

pub mod apollo;
pub mod console;
pub mod debugger;
pub mod dom;
pub mod graphql;
pub mod network;
pub mod page;
pub mod performance;
pub mod react;
pub mod redux;
pub mod runtime;
pub mod screenshot;
pub mod storage;
pub mod websocket;
pub mod xstate;
pub mod zustand;

pub use apollo::ApolloProvider;
pub use console::ConsoleProvider;
pub use debugger::DebuggerProvider;
pub use dom::DomProvider;
pub use graphql::GraphqlProvider;
pub use network::NetworkProvider;
pub use page::PageProvider;
pub use performance::PerformanceProvider;
pub use react::ReactProvider;
pub use redux::ReduxProvider;
pub use runtime::RuntimeProvider;
pub use screenshot::ScreenshotProvider;
pub use storage::StorageProvider;
pub use websocket::WebSocketProvider;
pub use xstate::XStateProvider;
pub use zustand::ZustandProvider;

/// One instance of every provider, in listing order.
pub fn all(
    client: Arc<CdpClient>,
    config: &ToolsConfig,
    screenshots: Option<Arc<dyn ScreenshotStore>>,
) -> Vec<Arc<dyn ToolProvider>> {
    let capacity = config.capture_capacity;
    vec![
        Arc::new(PageProvider::new(client.clone())),
        Arc::new(RuntimeProvider::new(client.clone())),
        Arc::new(ConsoleProvider::new(client.clone(), capacity)),
        Arc::new(DomProvider::new(client.clone())),
        Arc::new(NetworkProvider::new(client.clone())),
        Arc::new(DebuggerProvider::new(client.clone())),
        Arc::new(ScreenshotProvider::new(client.clone(), screenshots)),
        Arc::new(WebSocketProvider::new(client.clone(), capacity)),
        Arc::new(GraphqlProvider::new(client.clone(), capacity)),
        Arc::new(ReactProvider::new(client.clone())),
        Arc::new(ReduxProvider::new(client.clone())),
        Arc::new(ApolloProvider::new(client.clone())),
        Arc::new(XStateProvider::new(client.clone())),
        Arc::new(ZustandProvider::new(client.clone())),
        Arc::new(StorageProvider::new(client.clone())),
        Arc::new(PerformanceProvider::new(client)),
    ]
}

fn default_limit() -> usize {
    100
}

fn default_true() -> bool {
    true
}
