// ── Connection directory ──
//
// Owns one `ConnectionSession` per controlled airport. Watches each
// session's link state and only declares an airport lost after it has
// stayed down for the whole disconnect-grace period. Debounces API key
// rotation across every open session.

use std::sync::Arc;

use barsync_api::Connector;
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::AirportCode;
use crate::registry::DeviceRegistry;
use crate::session::{ConnectionSession, ConnectionState};

const LOST_CHANNEL_CAPACITY: usize = 64;

/// Per-airport session registry. Cheaply cloneable.
#[derive(Clone)]
pub struct ConnectionDirectory {
    inner: Arc<DirectoryInner>,
}

struct DirectoryInner {
    registry: DeviceRegistry,
    connector: Arc<dyn Connector>,
    config: SyncConfig,
    api_key: parking_lot::RwLock<Option<SecretString>>,
    sessions: DashMap<AirportCode, DirectoryEntry>,
    lost: broadcast::Sender<AirportCode>,
    /// Pending debounced key rotation, superseded by the next one.
    key_rotation: parking_lot::Mutex<Option<CancellationToken>>,
    /// Serializes `connect_airport` so one airport never gets two sessions.
    connecting: tokio::sync::Mutex<()>,
}

struct DirectoryEntry {
    session: ConnectionSession,
    /// Stops the grace watcher for this session.
    watcher: CancellationToken,
}

impl ConnectionDirectory {
    pub fn new(registry: DeviceRegistry, connector: Arc<dyn Connector>, config: SyncConfig) -> Self {
        let (lost, _) = broadcast::channel(LOST_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(DirectoryInner {
                registry,
                connector,
                api_key: parking_lot::RwLock::new(config.api_key.clone()),
                config,
                sessions: DashMap::new(),
                lost,
                key_rotation: parking_lot::Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Return the airport's connected session, or replace any stale one
    /// with a freshly connected session.
    ///
    /// A session whose connect fails is not kept.
    pub async fn connect_airport(
        &self,
        airport: impl Into<AirportCode>,
        controller_id: &str,
    ) -> Result<ConnectionSession, CoreError> {
        let airport = airport.into();
        if airport.is_empty() {
            return Err(CoreError::MissingAirport);
        }

        let _connecting = self.inner.connecting.lock().await;

        let api_key = self.inner.api_key.read().clone();
        let Some(api_key) = api_key else {
            return Err(CoreError::MissingCredentials);
        };

        if let Some(existing) = self.session(&airport) {
            if existing.is_connected() {
                return Ok(existing);
            }
            tracing::info!(airport = %airport, "replacing stale session");
            self.disconnect_airport(&airport).await;
        }

        let mut config = self.inner.config.clone();
        config.api_key = Some(api_key);
        let session = ConnectionSession::new(
            airport.clone(),
            controller_id,
            &config,
            Arc::clone(&self.inner.connector),
            self.inner.registry.clone(),
        );
        session.connect().await?;

        let watcher = CancellationToken::new();
        self.inner.sessions.insert(
            airport.clone(),
            DirectoryEntry {
                session: session.clone(),
                watcher: watcher.clone(),
            },
        );
        tokio::spawn(self.clone().watch_session(airport.clone(), session.clone(), watcher));
        tracing::info!(airport = %airport, controller_id, "airport connected");

        Ok(session)
    }

    /// Stop watching, disconnect and forget an airport's session.
    /// Returns `false` if there was none.
    pub async fn disconnect_airport(&self, airport: &AirportCode) -> bool {
        let Some((_, entry)) = self.inner.sessions.remove(airport) else {
            return false;
        };
        entry.watcher.cancel();
        entry.session.shutdown().await;
        tracing::info!(airport = %airport, "airport disconnected");
        true
    }

    pub async fn disconnect_all(&self) {
        let airports: Vec<AirportCode> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for airport in &airports {
            self.disconnect_airport(airport).await;
        }
    }

    pub fn session(&self, airport: &AirportCode) -> Option<ConnectionSession> {
        self.inner
            .sessions
            .get(airport)
            .map(|entry| entry.session.clone())
    }

    /// Every session, connected or not.
    pub fn sessions(&self) -> Vec<ConnectionSession> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.session.clone())
            .collect()
    }

    pub fn is_airport_connected(&self, airport: &AirportCode) -> bool {
        self.session(airport)
            .is_some_and(|session| session.is_connected())
    }

    /// Airports whose session is currently connected, sorted.
    pub fn connected_airports(&self) -> Vec<AirportCode> {
        let mut airports: Vec<AirportCode> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.session.is_connected())
            .map(|entry| entry.key().clone())
            .collect();
        airports.sort();
        airports
    }

    /// Airports dropped after their disconnect-grace period expired.
    pub fn subscribe_lost(&self) -> broadcast::Receiver<AirportCode> {
        self.inner.lost.subscribe()
    }

    // ── Credentials ──────────────────────────────────────────────────

    /// Store a new API key and, after the debounce window, reconnect
    /// every open session with it. A later call supersedes a pending one.
    ///
    /// Returns `false` (and does nothing) if the key is unchanged.
    pub fn update_api_key(&self, key: SecretString) -> bool {
        {
            let mut current = self.inner.api_key.write();
            let unchanged = current
                .as_ref()
                .is_some_and(|current| current.expose_secret() == key.expose_secret());
            if unchanged {
                tracing::debug!("API key unchanged");
                return false;
            }
            *current = Some(key.clone());
        }

        let token = CancellationToken::new();
        let previous = self.inner.key_rotation.lock().replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let directory = self.clone();
        let debounce = self.inner.config.timing.api_key_debounce;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(debounce) => directory.apply_api_key(&key).await,
            }
        });
        true
    }

    async fn apply_api_key(&self, key: &SecretString) {
        let sessions = self.sessions();
        tracing::info!(sessions = sessions.len(), "applying new API key");
        for session in sessions {
            session.set_api_key(key.clone());
            if let Err(e) = session.reconnect().await {
                tracing::warn!(airport = %session.airport(), error = %e, "reconnect with new API key failed");
            }
        }
    }

    // ── Disconnect grace ─────────────────────────────────────────────

    async fn watch_session(
        self,
        airport: AirportCode,
        session: ConnectionSession,
        cancel: CancellationToken,
    ) {
        let mut state = session.subscribe_connection();
        let grace = self.inner.config.timing.disconnect_grace;

        loop {
            let down = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                down = wait_until(&mut state, false) => down,
            };
            if !down {
                return;
            }

            tracing::info!(
                airport = %airport,
                grace_secs = grace.as_secs(),
                "session down, starting disconnect grace"
            );
            let expired = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                up = wait_until(&mut state, true) => {
                    if !up {
                        return;
                    }
                    false
                }
                () = tokio::time::sleep(grace) => true,
            };

            if !expired || session.is_connected() {
                tracing::info!(airport = %airport, "session recovered within grace");
                continue;
            }

            tracing::warn!(airport = %airport, "disconnect grace expired, airport lost");
            let removed = self
                .inner
                .sessions
                .remove_if(&airport, |_, entry| entry.session.ptr_eq(&session))
                .is_some();
            session.shutdown().await;
            if removed {
                let _ = self.inner.lost.send(airport);
            }
            return;
        }
    }
}

/// Wait until the link is (or is not) connected. `false` if the session
/// was dropped first.
async fn wait_until(state: &mut watch::Receiver<ConnectionState>, connected: bool) -> bool {
    loop {
        if state.borrow_and_update().is_connected() == connected {
            return true;
        }
        if state.changed().await.is_err() {
            return false;
        }
    }
}
