use thiserror::Error;

/// Top-level error type for the `barsync-api` crate.
///
/// Covers transport failures on the relay link and protocol failures
/// while decoding frames. `barsync-core` maps these into [`CoreError`]s.
///
/// [`CoreError`]: https://docs.rs/barsync-core
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Opening the WebSocket link failed (DNS, TLS, refused, timeout).
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The relay closed the link with a close frame.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Writing a frame to the link failed.
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading from the link failed.
    #[error("Receive failed: {0}")]
    Receive(String),

    /// No open link to write to.
    #[error("Not connected to the relay")]
    NotConnected,

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Protocol ────────────────────────────────────────────────────
    /// Frame was not valid JSON or its payload did not match its type,
    /// with the raw text for debugging.
    #[error("Malformed frame: {message}")]
    Malformed { message: String, body: String },

    /// Frame carried a `type` this client does not understand.
    #[error("Unknown message type: {kind}")]
    UnknownMessageType { kind: String },

    /// Serializing an outbound frame failed.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::Receive(_) | Self::Send(_)
        )
    }

    /// Returns `true` for decode failures on a single frame. The link
    /// itself is still usable.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::UnknownMessageType { .. })
    }

    pub(crate) fn malformed(err: &serde_json::Error, body: &str) -> Self {
        Self::Malformed {
            message: err.to_string(),
            body: body.to_owned(),
        }
    }
}
