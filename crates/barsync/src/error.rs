//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use barsync_config::ConfigError;
use barsync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect {airport} to the relay")]
    #[diagnostic(
        code(barsync::connection_failed),
        help(
            "Check that the relay is reachable and the airport code is correct.\n\
             Try: barsync -vv watch {airport}"
        )
    )]
    ConnectionFailed {
        airport: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("No network path to the relay")]
    #[diagnostic(code(barsync::offline))]
    Offline,

    // ── Credentials ──────────────────────────────────────────────────
    #[error("No API key configured")]
    #[diagnostic(
        code(barsync::no_credentials),
        help(
            "Pass --api-key, set BARSYNC_API_KEY, or add api_key / api_key_env to\n\
             {path}"
        )
    )]
    NoCredentials { path: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(barsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(barsync::config))]
    Config(Box<ConfigError>),

    // ── Engine ───────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(barsync::sync))]
    Sync(Box<CoreError>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Offline => exit_code::CONNECTION,
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials => CliError::NoCredentials {
                path: barsync_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { airport, reason } => CliError::ConnectionFailed {
                airport,
                source: reason.into(),
            },
            CoreError::NoNetworkPath => CliError::Offline,
            CoreError::MissingCredentials => CliError::NoCredentials {
                path: barsync_config::config_path().display().to_string(),
            },
            CoreError::MissingAirport => CliError::Validation {
                field: "airport".into(),
                reason: "airport code is empty".into(),
            },
            other => CliError::Sync(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn exit_codes_by_category() {
        let connect: CliError = CoreError::ConnectionFailed {
            airport: "EGLL".into(),
            reason: "refused".into(),
        }
        .into();
        assert_eq!(connect.exit_code(), exit_code::CONNECTION);

        let auth: CliError = CoreError::MissingCredentials.into();
        assert_eq!(auth.exit_code(), exit_code::AUTH);

        let usage: CliError = ConfigError::Validation {
            field: "relay_url".into(),
            reason: "bad".into(),
        }
        .into();
        assert_eq!(usage.exit_code(), exit_code::USAGE);

        let other: CliError = CoreError::Internal("boom".into()).into();
        assert_eq!(other.exit_code(), exit_code::GENERAL);
    }
}
