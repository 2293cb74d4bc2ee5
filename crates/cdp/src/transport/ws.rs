//! WebSocket transport over tokio-tungstenite.
//!
//! Single WebSocket per browser connection; every session is multiplexed over
//! it with `sessionId`.

use async_trait::async_trait;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Inbound, InboundRx, Transport};
use crate::error::{CdpError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WsTransport {
    /// Write half, serialized so frames never interleave
    sink: Mutex<WsSink>,
    open: Arc<AtomicBool>,
}

impl WsTransport {
    /// Connect to a `ws://` / `wss://` debugger URL.
    pub async fn connect(ws_url: &str) -> Result<(Arc<Self>, InboundRx)> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let reader_open = open.clone();
        tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if tx.send(Inbound::Frame(text)).is_err() {
                            break "consumer dropped".to_string();
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if tx.send(Inbound::Frame(text)).is_err() {
                                break "consumer dropped".to_string();
                            }
                        }
                        Err(e) => tracing::warn!("Dropping non-UTF-8 binary frame: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by browser".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };

            tracing::info!("WebSocket closed: {}", reason);
            reader_open.store(false, Ordering::SeqCst);
            let _ = tx.send(Inbound::Closed { reason });
        });

        tracing::debug!("WebSocket connected to {}", ws_url);
        Ok((
            Arc::new(Self {
                sink: Mutex::new(sink),
                open,
            }),
            rx,
        ))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if !self.is_open() {
            return Err(CdpError::connection_lost());
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Text(frame)).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(CdpError::WebSocket(e));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            let mut sink = self.sink.lock().await;
            sink.close().await?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
