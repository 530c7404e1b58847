//! WebSocket connector for the BARS relay.
//!
//! Opens `wss://…/connect?key=…&airport=…` with `tokio-tungstenite` and
//! splits the stream into a [`FrameSink`] and [`FrameSource`]. Reconnect
//! policy lives in the session layer, not here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::Error;
use crate::transport::{Connector, FrameSink, FrameSource, RelayEndpoint, RelayLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ── WsConnector ──────────────────────────────────────────────────────

/// Connects to the relay over TLS WebSocket.
///
/// Cheaply cloneable; clones share the network-availability flag.
#[derive(Debug, Clone)]
pub struct WsConnector {
    network: Arc<AtomicBool>,
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            network: Arc::new(AtomicBool::new(true)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Record whether the host has a usable network path. Hosts that
    /// watch OS network notifications feed them in here.
    pub fn set_network_available(&self, available: bool) {
        self.network.store(available, Ordering::Release);
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn has_network_path(&self) -> bool {
        self.network.load(Ordering::Acquire)
    }

    async fn connect(&self, endpoint: &RelayEndpoint) -> Result<RelayLink, Error> {
        tracing::info!(
            airport = endpoint.airport(),
            relay = endpoint.base().as_str(),
            "connecting to relay"
        );

        let url = endpoint.connect_url();
        let (stream, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    Error::WebSocketConnect(format!(
                        "timed out after {}s",
                        self.connect_timeout.as_secs()
                    ))
                })?
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::debug!(
            airport = endpoint.airport(),
            status = %response.status(),
            "relay handshake complete"
        );

        let (write, read) = stream.split();
        Ok(RelayLink {
            sink: Box::new(WsSink { write }),
            source: Box::new(WsSource { read }),
        })
    }
}

// ── Link halves ──────────────────────────────────────────────────────

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), Error> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "Client disconnecting".into(),
        };
        self.write
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| Error::Send(e.to_string()))?;
        self.write.close().await.map_err(|e| Error::Send(e.to_string()))
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_text(&mut self) -> Result<Option<String>, Error> {
        while let Some(msg) = self.read.next().await {
            match msg {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        tracing::info!(
                            code = u16::from(frame.code),
                            reason = frame.reason.as_str(),
                            "relay closed the link"
                        );
                    } else {
                        tracing::info!("relay closed the link");
                    }
                    return Ok(None);
                }
                Ok(Message::Binary(data)) => {
                    tracing::debug!(len = data.len(), "ignoring binary frame");
                }
                // Ping/Pong are answered by tungstenite itself.
                Ok(_) => {}
                Err(e) => return Err(Error::Receive(e.to_string())),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_flag_is_shared_between_clones() {
        let connector = WsConnector::new();
        let clone = connector.clone();
        assert!(clone.has_network_path());

        connector.set_network_available(false);
        assert!(!clone.has_network_path());
    }
}
