//! Basic CDP example - connect, attach to the first tab, evaluate, watch events

use cdp::{CdpClient, ClientConfig, EvaluateOptions};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = ClientConfig::from_env()?;
    println!("Connecting to Chrome at: {}", config.ws_url);

    let client = CdpClient::connect(config).await?;
    println!("Connected!");

    let version = client.send_browser("Browser.getVersion", None).await?;
    println!("Browser version: {}", version["product"]);

    for target in client.list_targets().await? {
        println!("Target {} [{}] {}", target.target_id, target.target_type, target.url);
    }

    let session_id = client.resolve_session(None)?;
    println!("Default session: {}", session_id);

    client.on(
        "Runtime.consoleAPICalled",
        Some(session_id.clone()),
        Arc::new(|event| println!("console.{}: {}", event.params["type"], event.params["args"])),
    );

    let title = client
        .evaluate_value("document.title", EvaluateOptions::default(), None)
        .await?;
    println!("Page title via JS: {}", title);

    client
        .evaluate("console.log('hello from basic_cdp')", EvaluateOptions::default(), None)
        .await?;

    // Keep alive for a bit to see events
    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;

    client.close().await?;
    println!("Disconnected");

    Ok(())
}
