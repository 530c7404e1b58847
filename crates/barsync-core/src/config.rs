// ── Runtime sync configuration ──
//
// These types describe *how* the sync engine talks to the relay and how
// long each of its timers runs. They carry credential data but never
// touch disk. The CLI (via barsync-config) builds a `SyncConfig` and
// hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// Every timer the sync engine runs.
///
/// Defaults are the production values; tests shrink or stretch them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTiming {
    /// How long a local optimistic update outranks conflicting relay echoes.
    pub grace_window: Duration,
    /// Delay between a send and its confirming snapshot request.
    pub verification_delay: Duration,
    /// Minimum spacing between unforced snapshot requests.
    pub snapshot_min_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Silence after which the link is considered dead.
    pub heartbeat_timeout: Duration,
    /// Wait before reconnecting after a heartbeat failure.
    pub heartbeat_reconnect_delay: Duration,
    /// Wait before reconnecting after a receive failure.
    pub receive_reconnect_delay: Duration,
    /// Pause before an inbound update is applied.
    pub inbound_settle_delay: Duration,
    pub toggle_debounce: Duration,
    pub auto_raise_after: Duration,
    /// How long an airport may stay disconnected before it is dropped.
    pub disconnect_grace: Duration,
    pub api_key_debounce: Duration,
    pub audit_interval: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_millis(900),
            verification_delay: Duration::from_millis(450),
            snapshot_min_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            heartbeat_reconnect_delay: Duration::from_secs(1),
            receive_reconnect_delay: Duration::from_secs(3),
            inbound_settle_delay: Duration::from_millis(100),
            toggle_debounce: Duration::from_millis(250),
            auto_raise_after: Duration::from_secs(45),
            disconnect_grace: Duration::from_secs(10),
            api_key_debounce: Duration::from_millis(600),
            audit_interval: Duration::from_secs(20),
        }
    }
}

/// Configuration for the whole sync engine.
///
/// Built by the CLI, passed to [`SyncHub`](crate::SyncHub) -- core never
/// reads config files.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Relay WebSocket endpoint, without query parameters.
    pub relay_url: Url,
    /// API key sent as the `key` connection parameter.
    pub api_key: Option<SecretString>,
    pub timing: SyncTiming,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            api_key: None,
            timing: SyncTiming::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }
}

/// Parsed [`barsync_api::DEFAULT_RELAY_URL`].
pub fn default_relay_url() -> Url {
    #[allow(clippy::expect_used)]
    Url::parse(barsync_api::DEFAULT_RELAY_URL).expect("default relay URL is valid")
}
