// ── Connection session ──
//
// One resilient link to the relay for one airport. Owns the receive
// loop, the heartbeat watchdog and a listener on the device registry;
// serializes every write through a single sink gate; tracks optimistic
// updates until the relay confirms or overrides them.

mod dispatch;
mod outbound;
mod pending;
mod tasks;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use barsync_api::{Connector, FrameSink, Outbound, RelayEndpoint, RelayLink};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{SyncConfig, SyncTiming};
use crate::error::CoreError;
use crate::model::{AirportCode, Device};
use crate::registry::DeviceRegistry;

use self::pending::PendingUpdate;

const NOTICE_CHANNEL_CAPACITY: usize = 256;

// ── Public types ─────────────────────────────────────────────────────

/// Link state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Link dropped; waiting out the reconnect delay.
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Peer presence announced by the relay. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayNotice {
    ControllerConnected { controller_id: String },
    ControllerDisconnected { controller_id: String },
}

/// Relay-side object states as this session last saw or sent them.
pub type RelayStates = BTreeMap<String, bool>;

// ── ConnectionSession ────────────────────────────────────────────────

/// Handle to one airport's relay link. Cheaply cloneable.
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    airport: AirportCode,
    controller_id: String,
    relay_url: Url,
    api_key: parking_lot::RwLock<Option<SecretString>>,
    timing: SyncTiming,
    connector: Arc<dyn Connector>,
    registry: DeviceRegistry,

    /// Write half of the open link. Holding the lock is the send gate.
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    sync: parking_lot::Mutex<SyncState>,

    connection: watch::Sender<ConnectionState>,
    errors: broadcast::Sender<String>,
    notices: broadcast::Sender<RelayNotice>,
    states: watch::Sender<Arc<RelayStates>>,

    /// Cancels the tasks of the current link.
    link: parking_lot::Mutex<Option<CancellationToken>>,
    /// Cancelled once by `shutdown`; suppresses reconnects afterwards.
    closed: CancellationToken,
    /// Serializes connect, disconnect and reconnect.
    lifecycle: tokio::sync::Mutex<()>,
    applying_inbound: AtomicBool,
    recovering: AtomicBool,
}

struct SyncState {
    cache: RelayStates,
    pending: HashMap<String, PendingUpdate>,
    last_snapshot_request: Option<Instant>,
    /// Relay started empty and nothing was registered locally yet:
    /// seed each device as it registers.
    deferred_seed: bool,
    last_received: Instant,
}

impl ConnectionSession {
    pub fn new(
        airport: impl Into<AirportCode>,
        controller_id: impl Into<String>,
        config: &SyncConfig,
        connector: Arc<dyn Connector>,
        registry: DeviceRegistry,
    ) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (errors, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let (states, _) = watch::channel(Arc::new(RelayStates::new()));

        Self {
            inner: Arc::new(SessionInner {
                airport: airport.into(),
                controller_id: controller_id.into(),
                relay_url: config.relay_url.clone(),
                api_key: parking_lot::RwLock::new(config.api_key.clone()),
                timing: config.timing.clone(),
                connector,
                registry,
                sink: tokio::sync::Mutex::new(None),
                sync: parking_lot::Mutex::new(SyncState {
                    cache: RelayStates::new(),
                    pending: HashMap::new(),
                    last_snapshot_request: None,
                    deferred_seed: false,
                    last_received: Instant::now(),
                }),
                connection,
                errors,
                notices,
                states,
                link: parking_lot::Mutex::new(None),
                closed: CancellationToken::new(),
                lifecycle: tokio::sync::Mutex::new(()),
                applying_inbound: AtomicBool::new(false),
                recovering: AtomicBool::new(false),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the relay link and start the receive, heartbeat and registry
    /// listener tasks.
    ///
    /// Missing credentials, a blank airport or no network path fail
    /// without touching the network. A transport failure leaves the
    /// session disconnected; retrying is up to the caller.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> Result<(), CoreError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.inner.closed.is_cancelled() {
            return Err(CoreError::NotConnected {
                airport: self.inner.airport.to_string(),
            });
        }

        let api_key = self
            .inner
            .api_key
            .read()
            .clone()
            .filter(|key| !key.expose_secret().trim().is_empty());
        let Some(api_key) = api_key else {
            return Err(self.reject(CoreError::MissingCredentials));
        };
        if self.inner.airport.is_empty() {
            return Err(self.reject(CoreError::MissingAirport));
        }
        if !self.inner.connector.has_network_path() {
            return Err(self.reject(CoreError::NoNetworkPath));
        }

        self.set_connection(ConnectionState::Connecting);
        let endpoint = RelayEndpoint::new(
            self.inner.relay_url.clone(),
            api_key,
            self.inner.airport.as_str(),
        );

        match self.inner.connector.connect(&endpoint).await {
            Ok(link) => {
                self.open(link).await;
                Ok(())
            }
            Err(err) => {
                let err = CoreError::from(err).for_airport(self.inner.airport.as_str());
                tracing::warn!(airport = %self.inner.airport, error = %err, "relay connect failed");
                self.report(err.to_string());
                self.set_connection(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    async fn open(&self, link: RelayLink) {
        let RelayLink { sink, source } = link;
        *self.inner.sink.lock().await = Some(sink);

        {
            let mut sync = self.inner.sync.lock();
            sync.last_received = Instant::now();
            sync.last_snapshot_request = None;
            sync.pending.clear();
        }

        let cancel = CancellationToken::new();
        let previous = self.inner.link.lock().replace(cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let events = self.inner.registry.subscribe();
        self.set_connection(ConnectionState::Connected);
        tracing::info!(
            airport = %self.inner.airport,
            controller_id = %self.inner.controller_id,
            "connected to relay"
        );

        tokio::spawn(self.clone().receive_loop(source, cancel.clone()));
        tokio::spawn(self.clone().heartbeat_loop(cancel.clone()));
        tokio::spawn(self.clone().registry_listener(events, cancel));
    }

    /// Close the link: best-effort `CLOSE` notice, then close the
    /// transport. Secondary errors are swallowed. Always ends in
    /// [`ConnectionState::Disconnected`] with exactly one notification.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.disconnect_locked().await;
    }

    async fn disconnect_locked(&self) {
        let link = self.inner.link.lock().take();
        if let Some(link) = link {
            link.cancel();
        }

        let sink = self.inner.sink.lock().await.take();
        if let Some(mut sink) = sink {
            match Outbound::Close.to_json() {
                Ok(text) => {
                    if let Err(e) = sink.send_text(text).await {
                        tracing::debug!(airport = %self.inner.airport, error = %e, "CLOSE notice not sent");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "CLOSE notice not encoded"),
            }
            if let Err(e) = sink.close().await {
                tracing::debug!(airport = %self.inner.airport, error = %e, "transport close failed");
            }
            tracing::info!(airport = %self.inner.airport, "disconnected from relay");
        }

        {
            let mut sync = self.inner.sync.lock();
            sync.pending.clear();
            sync.deferred_seed = false;
        }
        self.set_connection(ConnectionState::Disconnected);
    }

    /// Disconnect and reconnect, e.g. after an API key change.
    pub async fn reconnect(&self) -> Result<(), CoreError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.disconnect_locked().await;
        self.connect_locked().await
    }

    /// Disconnect for good. Pending recoveries become no-ops and later
    /// `connect` calls are refused.
    pub async fn shutdown(&self) {
        self.inner.closed.cancel();
        self.disconnect().await;
    }

    pub fn set_api_key(&self, key: SecretString) {
        *self.inner.api_key.write() = Some(key);
    }

    /// Disconnect, wait `delay`, then try one reconnect. Only one
    /// recovery runs at a time.
    pub(crate) fn schedule_recovery(&self, delay: Duration) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        if self.inner.recovering.swap(true, Ordering::AcqRel) {
            return;
        }

        let session = self.clone();
        tokio::spawn(async move {
            session.recover(delay).await;
            session.inner.recovering.store(false, Ordering::Release);
        });
    }

    async fn recover(&self, delay: Duration) {
        self.disconnect().await;
        self.set_connection(ConnectionState::Reconnecting);
        tracing::info!(
            airport = %self.inner.airport,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = self.inner.closed.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        if let Err(e) = self.connect().await {
            tracing::warn!(airport = %self.inner.airport, error = %e, "reconnect failed");
        }
    }

    // ── Updates ──────────────────────────────────────────────────────

    /// Push a device's current state (and its lead-on's inverse) to the relay.
    ///
    /// No-op while this session is applying relay input, so writes caused
    /// by the relay are never echoed back.
    pub async fn send_update(&self, device: &Device) {
        if self.inner.applying_inbound.load(Ordering::Acquire) {
            tracing::trace!(object_id = %device.id, "skipping send while applying relay input");
            return;
        }
        if device.airport != self.inner.airport {
            tracing::warn!(
                airport = %self.inner.airport,
                device_airport = %device.airport,
                object_id = %device.id,
                "device belongs to another airport"
            );
            return;
        }
        self.push_device(device, false).await;
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn airport(&self) -> &AirportCode {
        &self.inner.airport
    }

    pub fn controller_id(&self) -> &str {
        &self.inner.controller_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    /// Human-readable transport, protocol and relay errors.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.inner.errors.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<RelayNotice> {
        self.inner.notices.subscribe()
    }

    /// Copy of the relay-state cache.
    pub fn relay_states(&self) -> RelayStates {
        self.inner.sync.lock().cache.clone()
    }

    pub fn relay_state(&self, object_id: &str) -> Option<bool> {
        self.inner.sync.lock().cache.get(object_id).copied()
    }

    /// Full relay-state map, republished after every change.
    pub fn subscribe_states(&self) -> watch::Receiver<Arc<RelayStates>> {
        self.inner.states.subscribe()
    }

    /// [`subscribe_states`](Self::subscribe_states) as a `Stream`.
    pub fn states_stream(&self) -> WatchStream<Arc<RelayStates>> {
        WatchStream::new(self.subscribe_states())
    }

    /// Whether two handles refer to the same session.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn set_connection(&self, state: ConnectionState) {
        tracing::debug!(airport = %self.inner.airport, ?state, "connection state");
        self.inner.connection.send_replace(state);
    }

    fn report(&self, message: impl Into<String>) {
        let _ = self.inner.errors.send(message.into());
    }

    fn reject(&self, err: CoreError) -> CoreError {
        tracing::warn!(airport = %self.inner.airport, error = %err, "connect rejected");
        self.report(err.to_string());
        err
    }

    fn publish_states(&self) {
        let snapshot = Arc::new(self.inner.sync.lock().cache.clone());
        self.inner.states.send_replace(snapshot);
    }

    /// Mark the session as applying relay input until the guard drops.
    pub(crate) fn applying_inbound(&self) -> ApplyingInbound<'_> {
        self.inner.applying_inbound.store(true, Ordering::Release);
        ApplyingInbound(&self.inner.applying_inbound)
    }
}

pub(crate) struct ApplyingInbound<'a>(&'a AtomicBool);

impl Drop for ApplyingInbound<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("airport", &self.inner.airport)
            .field("controller_id", &self.inner.controller_id)
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}
