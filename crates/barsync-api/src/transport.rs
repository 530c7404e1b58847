//! Relay endpoint and the link abstraction sessions are written against.
//!
//! A [`Connector`] opens one [`RelayLink`] per session. The link is split
//! into a write half ([`FrameSink`]) and a read half ([`FrameSource`]) so
//! the receive loop can own the reader while writers share the sink.

use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::Error;

/// Production relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "wss://v2.stopbars.com/connect";

// ── RelayEndpoint ────────────────────────────────────────────────────

/// Where and as whom a session connects.
#[derive(Clone)]
pub struct RelayEndpoint {
    base: Url,
    api_key: SecretString,
    airport: String,
}

impl RelayEndpoint {
    pub fn new(base: Url, api_key: SecretString, airport: impl Into<String>) -> Self {
        Self {
            base,
            api_key,
            airport: airport.into(),
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn airport(&self) -> &str {
        &self.airport
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    /// Connection URL with `key` and `airport` query parameters appended.
    ///
    /// The result embeds the API key; never log it.
    pub fn connect_url(&self) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret())
            .append_pair("airport", &self.airport);
        url
    }
}

impl fmt::Debug for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayEndpoint")
            .field("base", &self.base.as_str())
            .field("airport", &self.airport)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// ── Link halves ──────────────────────────────────────────────────────

/// Write half of a relay link.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), Error>;

    /// Send a normal-closure close frame and shut the write half.
    async fn close(&mut self) -> Result<(), Error>;
}

/// Read half of a relay link.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame. `Ok(None)` once the relay has closed the link cleanly.
    async fn next_text(&mut self) -> Result<Option<String>, Error>;
}

/// An open relay link, split into its two halves.
pub struct RelayLink {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl fmt::Debug for RelayLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayLink").finish_non_exhaustive()
    }
}

// ── Connector ────────────────────────────────────────────────────────

/// Opens relay links.
///
/// Implemented by [`WsConnector`](crate::websocket::WsConnector) for the
/// real relay and by [`MockConnector`](crate::mock::MockConnector) in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Whether the host currently has a usable network path. Sessions
    /// refuse to connect while this is `false`.
    fn has_network_path(&self) -> bool {
        true
    }

    async fn connect(&self, endpoint: &RelayEndpoint) -> Result<RelayLink, Error>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn endpoint() -> RelayEndpoint {
        RelayEndpoint::new(
            Url::parse(DEFAULT_RELAY_URL).unwrap(),
            SecretString::from("k3y with space".to_owned()),
            "EGLL",
        )
    }

    #[test]
    fn connect_url_appends_encoded_query() {
        let url = endpoint().connect_url();
        assert_eq!(url.host_str(), Some("v2.stopbars.com"));
        assert_eq!(url.path(), "/connect");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("key".to_owned(), "k3y with space".to_owned()),
                ("airport".to_owned(), "EGLL".to_owned()),
            ]
        );
    }

    #[test]
    fn debug_redacts_key() {
        let rendered = format!("{:?}", endpoint());
        assert!(!rendered.contains("k3y"));
        assert!(rendered.contains("EGLL"));
    }
}
