// ── Core error types ──
//
// User-facing errors from barsync-core. Consumers never see raw
// tungstenite or serde failures; the `From<barsync_api::Error>` impl
// translates transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("No API key configured")]
    MissingCredentials,

    #[error("No airport selected")]
    MissingAirport,

    #[error("No network path available")]
    NoNetworkPath,

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect {airport} to the relay: {reason}")]
    ConnectionFailed { airport: String, reason: String },

    #[error("{airport} is not connected to the relay")]
    NotConnected { airport: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {airport}/{id}")]
    DeviceNotFound { airport: String, id: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Configuration failures are rejected up front and never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials | Self::MissingAirport | Self::Config { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<barsync_api::Error> for CoreError {
    fn from(err: barsync_api::Error) -> Self {
        match err {
            barsync_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                airport: String::new(),
                reason,
            },
            barsync_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                airport: String::new(),
                reason: format!("closed by relay (code {code}): {reason}"),
            },
            barsync_api::Error::NotConnected => CoreError::NotConnected {
                airport: String::new(),
            },
            barsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid relay URL: {e}"),
            },
            barsync_api::Error::Malformed { message, .. } => CoreError::Protocol { message },
            barsync_api::Error::UnknownMessageType { kind } => CoreError::Protocol {
                message: format!("unknown message type {kind}"),
            },
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl CoreError {
    /// Attach the airport to connection variants converted without one.
    pub(crate) fn for_airport(self, code: &str) -> Self {
        match self {
            Self::ConnectionFailed { reason, .. } => Self::ConnectionFailed {
                airport: code.to_owned(),
                reason,
            },
            Self::NotConnected { .. } => Self::NotConnected {
                airport: code.to_owned(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_domain_variants() {
        let err: CoreError = barsync_api::Error::WebSocketConnect("refused".into()).into();
        assert!(matches!(
            err.for_airport("EGLL"),
            CoreError::ConnectionFailed { ref airport, ref reason } if airport == "EGLL" && reason == "refused"
        ));

        let err: CoreError = barsync_api::Error::UnknownMessageType { kind: "PING".into() }.into();
        assert!(matches!(err, CoreError::Protocol { .. }));
    }

    #[test]
    fn config_classification() {
        assert!(CoreError::MissingCredentials.is_config());
        assert!(CoreError::MissingAirport.is_config());
        assert!(!CoreError::NoNetworkPath.is_config());
    }
}
