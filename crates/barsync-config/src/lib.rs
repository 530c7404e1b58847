//! On-disk configuration for barsync.
//!
//! A TOML file in the platform config directory, overlaid with
//! `BARSYNC_`-prefixed environment variables, API key resolution, and
//! translation to `barsync_core::SyncConfig`. The core never reads files;
//! this crate is the only place that does.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use barsync_core::{SyncConfig, SyncTiming};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no API key configured (set api_key, or api_key_env to a variable holding it)")]
    NoCredentials,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Relay WebSocket endpoint.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// API key (plaintext -- prefer `api_key_env`).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// Identifier sent with this client's updates.
    pub controller_id: Option<String>,

    /// Airports to connect on startup.
    #[serde(default)]
    pub airports: Vec<String>,

    /// Timer overrides, in milliseconds.
    #[serde(default)]
    pub timing: TimingOverrides,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            api_key: None,
            api_key_env: None,
            controller_id: None,
            airports: Vec::new(),
            timing: TimingOverrides::default(),
        }
    }
}

fn default_relay_url() -> String {
    barsync_core::config::default_relay_url().to_string()
}

/// Optional per-timer overrides. Unset fields keep the engine defaults.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimingOverrides {
    pub grace_window_ms: Option<u64>,
    pub verification_delay_ms: Option<u64>,
    pub snapshot_min_interval_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub heartbeat_timeout_ms: Option<u64>,
    pub heartbeat_reconnect_delay_ms: Option<u64>,
    pub receive_reconnect_delay_ms: Option<u64>,
    pub inbound_settle_delay_ms: Option<u64>,
    pub toggle_debounce_ms: Option<u64>,
    pub auto_raise_ms: Option<u64>,
    pub disconnect_grace_ms: Option<u64>,
    pub api_key_debounce_ms: Option<u64>,
    pub audit_interval_ms: Option<u64>,
}

impl TimingOverrides {
    /// Apply the set fields on top of `timing`. Zero is rejected.
    pub fn apply(&self, timing: &mut SyncTiming) -> Result<(), ConfigError> {
        let fields = [
            ("grace_window_ms", self.grace_window_ms, &mut timing.grace_window),
            ("verification_delay_ms", self.verification_delay_ms, &mut timing.verification_delay),
            (
                "snapshot_min_interval_ms",
                self.snapshot_min_interval_ms,
                &mut timing.snapshot_min_interval,
            ),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms, &mut timing.heartbeat_interval),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms, &mut timing.heartbeat_timeout),
            (
                "heartbeat_reconnect_delay_ms",
                self.heartbeat_reconnect_delay_ms,
                &mut timing.heartbeat_reconnect_delay,
            ),
            (
                "receive_reconnect_delay_ms",
                self.receive_reconnect_delay_ms,
                &mut timing.receive_reconnect_delay,
            ),
            (
                "inbound_settle_delay_ms",
                self.inbound_settle_delay_ms,
                &mut timing.inbound_settle_delay,
            ),
            ("toggle_debounce_ms", self.toggle_debounce_ms, &mut timing.toggle_debounce),
            ("auto_raise_ms", self.auto_raise_ms, &mut timing.auto_raise_after),
            ("disconnect_grace_ms", self.disconnect_grace_ms, &mut timing.disconnect_grace),
            ("api_key_debounce_ms", self.api_key_debounce_ms, &mut timing.api_key_debounce),
            ("audit_interval_ms", self.audit_interval_ms, &mut timing.audit_interval),
        ];

        for (field, value, target) in fields {
            let Some(ms) = value else { continue };
            if ms == 0 {
                return Err(ConfigError::Validation {
                    field: format!("timing.{field}"),
                    reason: "must be greater than zero".into(),
                });
            }
            *target = Duration::from_millis(ms);
        }
        Ok(())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "stopbars", "barsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("barsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the default file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing is fine) + environment.
///
/// Environment keys nest with a double underscore:
/// `BARSYNC_TIMING__GRACE_WINDOW_MS=500`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("BARSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Write `cfg` as TOML to `path`, creating parent directories.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the API key: the variable named by `api_key_env` first, then
/// the plaintext `api_key`. Blank values are skipped.
pub fn resolve_api_key(cfg: &Config) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = cfg.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            if !val.trim().is_empty() {
                return Ok(SecretString::from(val));
            }
        }
    }

    if let Some(ref key) = cfg.api_key {
        if !key.trim().is_empty() {
            return Ok(SecretString::from(key.clone()));
        }
    }

    Err(ConfigError::NoCredentials)
}

/// Build a `SyncConfig` from the file config.
pub fn to_sync_config(cfg: &Config) -> Result<SyncConfig, ConfigError> {
    let relay_url: Url = cfg.relay_url.parse().map_err(|_| ConfigError::Validation {
        field: "relay_url".into(),
        reason: format!("invalid URL: {}", cfg.relay_url),
    })?;
    if !matches!(relay_url.scheme(), "ws" | "wss") {
        return Err(ConfigError::Validation {
            field: "relay_url".into(),
            reason: format!("expected a ws:// or wss:// URL, got '{}'", relay_url.scheme()),
        });
    }

    let api_key = resolve_api_key(cfg)?;

    let mut timing = SyncTiming::default();
    cfg.timing.apply(&mut timing)?;

    Ok(SyncConfig {
        relay_url,
        api_key: Some(api_key),
        timing,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults_without_file() {
        Jail::expect_with(|_jail| {
            let cfg = load_config_from(Path::new("missing.toml")).unwrap();
            assert_eq!(cfg.relay_url, "wss://v2.stopbars.com/connect");
            assert!(cfg.api_key.is_none());
            assert!(cfg.airports.is_empty());
            assert_eq!(cfg.timing, TimingOverrides::default());
            Ok(())
        });
    }

    #[test]
    fn file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                    api_key = "file-key"
                    controller_id = "ctl-1"
                    airports = ["EGLL", "KJFK"]

                    [timing]
                    grace_window_ms = 500
                "#,
            )?;
            jail.set_env("BARSYNC_CONTROLLER_ID", "ctl-env");
            jail.set_env("BARSYNC_TIMING__AUDIT_INTERVAL_MS", "5000");

            let cfg = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(cfg.api_key.as_deref(), Some("file-key"));
            assert_eq!(cfg.controller_id.as_deref(), Some("ctl-env"));
            assert_eq!(cfg.airports, vec!["EGLL".to_owned(), "KJFK".to_owned()]);
            assert_eq!(cfg.timing.grace_window_ms, Some(500));
            assert_eq!(cfg.timing.audit_interval_ms, Some(5000));

            let sync = to_sync_config(&cfg).unwrap();
            assert_eq!(sync.timing.grace_window, Duration::from_millis(500));
            assert_eq!(sync.timing.audit_interval, Duration::from_secs(5));
            assert_eq!(sync.timing.auto_raise_after, Duration::from_secs(45));
            assert_eq!(sync.api_key.unwrap().expose_secret(), "file-key");
            Ok(())
        });
    }

    #[test]
    fn env_var_key_wins_over_plaintext() {
        Jail::expect_with(|jail| {
            jail.set_env("BARS_TEST_KEY", "from-env");
            let cfg = Config {
                api_key: Some("plaintext".into()),
                api_key_env: Some("BARS_TEST_KEY".into()),
                ..Config::default()
            };
            assert_eq!(resolve_api_key(&cfg).unwrap().expose_secret(), "from-env");

            let unset = Config {
                api_key: Some("plaintext".into()),
                api_key_env: Some("BARS_TEST_KEY_UNSET".into()),
                ..Config::default()
            };
            assert_eq!(resolve_api_key(&unset).unwrap().expose_secret(), "plaintext");
            Ok(())
        });
    }

    #[test]
    fn blank_key_is_no_credentials() {
        let cfg = Config {
            api_key: Some("  ".into()),
            ..Config::default()
        };
        assert!(matches!(resolve_api_key(&cfg), Err(ConfigError::NoCredentials)));
        assert!(matches!(to_sync_config(&cfg), Err(ConfigError::NoCredentials)));
    }

    #[test]
    fn rejects_bad_relay_url_and_zero_timers() {
        let http = Config {
            relay_url: "https://v2.stopbars.com/connect".into(),
            api_key: Some("k".into()),
            ..Config::default()
        };
        assert!(matches!(
            to_sync_config(&http),
            Err(ConfigError::Validation { ref field, .. }) if field == "relay_url"
        ));

        let zero = Config {
            api_key: Some("k".into()),
            timing: TimingOverrides {
                heartbeat_interval_ms: Some(0),
                ..TimingOverrides::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            to_sync_config(&zero),
            Err(ConfigError::Validation { ref field, .. }) if field == "timing.heartbeat_interval_ms"
        ));
    }

    #[test]
    fn save_then_load() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("nested").join("config.toml");
            let cfg = Config {
                controller_id: Some("ctl-1".into()),
                airports: vec!["EGLL".into()],
                ..Config::default()
            };
            save_config(&cfg, &path).unwrap();

            let loaded = load_config_from(&path).unwrap();
            assert_eq!(loaded.controller_id.as_deref(), Some("ctl-1"));
            assert_eq!(loaded.airports, vec!["EGLL".to_owned()]);
            Ok(())
        });
    }
}
