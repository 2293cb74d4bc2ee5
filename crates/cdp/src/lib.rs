//! CDP session and command dispatch layer
//!
//! One connection to a browser debug endpoint, multiplexed across attached
//! targets. Commands are correlated by id, events fan out to subscribers,
//! and sessions enable their domains lazily.
//!
//! ```text
//! Transport ──frames──▶ read loop ──responses──▶ Dispatcher (pending by id)
//!                                  └─events────▶ EventRouter (by method, session)
//! CdpClient = Dispatcher + EventRouter + SessionRegistry over one Transport
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

pub use client::CdpClient;
pub use config::ClientConfig;
pub use dispatcher::Dispatcher;
pub use error::{CdpError, Result};
pub use events::{ConnectionEvent, EventBus};
pub use protocol::{CdpEvent, CdpRequest, CdpResponse, EvaluateOptions, SessionId, TargetInfo};
pub use router::{EventListener, EventRouter, SubscriptionHandle};
pub use session::{Session, SessionRegistry};
pub use transport::{Transport, WsTransport};
