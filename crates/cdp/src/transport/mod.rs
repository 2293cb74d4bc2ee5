//! CDP Transport - one duplex connection to a browser debug endpoint
//!
//! The transport only moves text frames. It does not parse them; the client's
//! read loop classifies each frame as response or event.
//!
//! Incoming frames and the final close notification arrive on an unbounded
//! channel handed out at connect time, so the socket reader never waits on
//! whoever consumes the frames.

pub mod loopback;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use loopback::{BrowserPeer, LoopbackBrowser, LoopbackTransport, Reply};
pub use ws::WsTransport;

/// Something read off the connection.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// One JSON text frame.
    Frame(String),
    /// The connection is gone. Always the last item on the channel.
    Closed { reason: String },
}

/// Receiving half handed to the single consumer of a transport.
pub type InboundRx = mpsc::UnboundedReceiver<Inbound>;

/// Outgoing half of a browser connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one frame. Fails when the connection is not open.
    async fn send(&self, frame: String) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;
}
