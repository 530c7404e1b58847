//! In-memory relay for tests.
//!
//! [`MockConnector`] hands out links whose far end is a [`MockRemote`]:
//! the test plays the relay, pushing inbound frames and inspecting what
//! the client sent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{OwnedMutexGuard, mpsc};

use crate::error::Error;
use crate::transport::{Connector, FrameSink, FrameSource, RelayEndpoint, RelayLink};

// ── MockConnector ────────────────────────────────────────────────────

/// A [`Connector`] backed by in-memory channels.
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<MockInner>,
}

struct MockInner {
    network: AtomicBool,
    fail_next: Mutex<Option<String>>,
    endpoints: Mutex<Vec<RelayEndpoint>>,
    remote_tx: mpsc::UnboundedSender<MockRemote>,
    remote_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockRemote>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MockInner {
                network: AtomicBool::new(true),
                fail_next: Mutex::new(None),
                endpoints: Mutex::new(Vec::new()),
                remote_tx,
                remote_rx: tokio::sync::Mutex::new(remote_rx),
            }),
        }
    }

    pub fn set_network_available(&self, available: bool) {
        self.inner.network.store(available, Ordering::Release);
    }

    /// Make the next `connect` fail with [`Error::WebSocketConnect`].
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        *self.inner.fail_next.lock() = Some(reason.into());
    }

    /// Number of connection attempts so far, including failed ones.
    pub fn connect_count(&self) -> usize {
        self.inner.endpoints.lock().len()
    }

    /// Every endpoint `connect` was called with, in order.
    pub fn endpoints(&self) -> Vec<RelayEndpoint> {
        self.inner.endpoints.lock().clone()
    }

    /// Wait for the next successfully opened link.
    pub async fn accept(&self) -> Option<MockRemote> {
        self.inner.remote_rx.lock().await.recv().await
    }

    /// A link that was already opened, without waiting.
    pub fn try_accept(&self) -> Option<MockRemote> {
        self.inner.remote_rx.try_lock().ok()?.try_recv().ok()
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn has_network_path(&self) -> bool {
        self.inner.network.load(Ordering::Acquire)
    }

    async fn connect(&self, endpoint: &RelayEndpoint) -> Result<RelayLink, Error> {
        self.inner.endpoints.lock().push(endpoint.clone());

        if let Some(reason) = self.inner.fail_next.lock().take() {
            return Err(Error::WebSocketConnect(reason));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let fail_send = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));
        let send_gate = Arc::new(tokio::sync::Mutex::new(()));

        let remote = MockRemote {
            endpoint: endpoint.clone(),
            inbound: inbound_tx,
            outbound: outbound_rx,
            fail_send: Arc::clone(&fail_send),
            closed: Arc::clone(&closed),
            send_gate: Arc::clone(&send_gate),
        };
        // Receiver lives as long as the connector; a send error means the
        // test is already tearing down.
        let _ = self.inner.remote_tx.send(remote);

        Ok(RelayLink {
            sink: Box::new(MockSink {
                outbound: outbound_tx,
                fail_send,
                closed,
                send_gate,
            }),
            source: Box::new(MockSource { inbound: inbound_rx }),
        })
    }
}

// ── MockRemote ───────────────────────────────────────────────────────

enum RemoteFrame {
    Text(String),
    Fail(String),
    Close,
}

/// The relay's end of one mock link.
pub struct MockRemote {
    endpoint: RelayEndpoint,
    inbound: mpsc::UnboundedSender<RemoteFrame>,
    outbound: mpsc::UnboundedReceiver<String>,
    fail_send: Arc<Mutex<Option<String>>>,
    closed: Arc<AtomicBool>,
    send_gate: Arc<tokio::sync::Mutex<()>>,
}

impl MockRemote {
    pub fn endpoint(&self) -> &RelayEndpoint {
        &self.endpoint
    }

    /// Deliver a JSON frame to the client.
    pub fn push(&self, frame: &Value) {
        self.push_text(frame.to_string());
    }

    /// Deliver raw text to the client, valid JSON or not.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(RemoteFrame::Text(text.into()));
    }

    /// Make the client's next read fail.
    pub fn fail_receive(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(RemoteFrame::Fail(reason.into()));
    }

    /// Close the link cleanly from the relay side.
    pub fn close(&self) {
        let _ = self.inbound.send(RemoteFrame::Close);
    }

    /// Make the client's next write fail.
    pub fn fail_next_send(&self, reason: impl Into<String>) {
        *self.fail_send.lock() = Some(reason.into());
    }

    /// Stall every client write until the returned guard drops.
    /// `None` if writes are already held.
    pub fn hold_sends(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.send_gate).try_lock_owned().ok()
    }

    /// Whether the client closed its write half.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Next frame the client sent, decoded as JSON.
    pub async fn recv(&mut self) -> Option<Value> {
        let text = self.outbound.recv().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Next frame the client sent whose `type` is `kind`, skipping others.
    pub async fn recv_kind(&mut self, kind: &str) -> Option<Value> {
        loop {
            let frame = self.recv().await?;
            if frame.get("type").and_then(Value::as_str) == Some(kind) {
                return Some(frame);
            }
        }
    }

    /// Every frame the client has sent so far that has not been read yet.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap_or(Value::String(text)));
        }
        frames
    }

    /// Like [`drain`](Self::drain), keeping only frames of one `type`.
    pub fn drain_kind(&mut self, kind: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|frame| frame.get("type").and_then(Value::as_str) == Some(kind))
            .collect()
    }
}

// ── Client halves ────────────────────────────────────────────────────

struct MockSink {
    outbound: mpsc::UnboundedSender<String>,
    fail_send: Arc<Mutex<Option<String>>>,
    closed: Arc<AtomicBool>,
    send_gate: Arc<tokio::sync::Mutex<()>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        let _gate = self.send_gate.lock().await;
        if let Some(reason) = self.fail_send.lock().take() {
            return Err(Error::Send(reason));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        self.outbound
            .send(text)
            .map_err(|_| Error::Send("relay end dropped".into()))
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MockSource {
    inbound: mpsc::UnboundedReceiver<RemoteFrame>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next_text(&mut self) -> Result<Option<String>, Error> {
        match self.inbound.recv().await {
            Some(RemoteFrame::Text(text)) => Ok(Some(text)),
            Some(RemoteFrame::Fail(reason)) => Err(Error::Receive(reason)),
            Some(RemoteFrame::Close) | None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use url::Url;

    use super::*;

    fn endpoint() -> RelayEndpoint {
        RelayEndpoint::new(
            Url::parse("wss://relay.test/connect").unwrap(),
            SecretString::from("key".to_owned()),
            "EGLL",
        )
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let connector = MockConnector::new();
        let mut link = connector.connect(&endpoint()).await.unwrap();
        let mut remote = connector.accept().await.unwrap();

        link.sink.send_text(r#"{"type":"HEARTBEAT"}"#.into()).await.unwrap();
        assert_eq!(remote.recv().await.unwrap(), json!({ "type": "HEARTBEAT" }));

        remote.push(&json!({ "type": "HEARTBEAT" }));
        assert_eq!(
            link.source.next_text().await.unwrap().as_deref(),
            Some(r#"{"type":"HEARTBEAT"}"#)
        );

        remote.close();
        assert!(link.source.next_text().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scripted_failures() {
        let connector = MockConnector::new();
        connector.fail_next_connect("refused");
        assert!(matches!(
            connector.connect(&endpoint()).await,
            Err(Error::WebSocketConnect(_))
        ));

        let mut link = connector.connect(&endpoint()).await.unwrap();
        let remote = connector.accept().await.unwrap();
        assert_eq!(connector.connect_count(), 2);

        remote.fail_next_send("broken pipe");
        assert!(matches!(link.sink.send_text("x".into()).await, Err(Error::Send(_))));
        tokio_test::assert_ok!(link.sink.send_text("y".into()).await);

        remote.fail_receive("reset");
        assert!(matches!(link.source.next_text().await, Err(Error::Receive(_))));

        link.sink.close().await.unwrap();
        assert!(remote.client_closed());
    }

    #[tokio::test]
    async fn held_sends_wait_for_release() {
        let connector = MockConnector::new();
        let mut link = connector.connect(&endpoint()).await.unwrap();
        let mut remote = connector.accept().await.unwrap();

        let gate = remote.hold_sends().unwrap();
        assert!(remote.hold_sends().is_none());
        let send = tokio::spawn(async move { link.sink.send_text(r#"{"type":"CLOSE"}"#.into()).await });
        tokio::task::yield_now().await;
        assert!(remote.drain().is_empty());

        drop(gate);
        tokio_test::assert_ok!(send.await.unwrap());
        assert_eq!(remote.recv().await.unwrap(), json!({ "type": "CLOSE" }));
    }

    #[tokio::test]
    async fn recv_kind_skips_other_frames() {
        let connector = MockConnector::new();
        let mut link = connector.connect(&endpoint()).await.unwrap();
        let mut remote = connector.accept().await.unwrap();

        link.sink.send_text(r#"{"type":"HEARTBEAT"}"#.into()).await.unwrap();
        link.sink
            .send_text(r#"{"type":"GET_STATE","airport":"EGLL","timestamp":1}"#.into())
            .await
            .unwrap();

        let frame = remote.recv_kind("GET_STATE").await.unwrap();
        assert_eq!(frame["airport"], "EGLL");
        assert!(remote.drain().is_empty());
    }
}
