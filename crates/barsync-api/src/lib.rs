// barsync-api: wire protocol and WebSocket transport for the BARS stop-bar relay

pub mod error;
pub mod mock;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use protocol::{Inbound, ObjectState, Outbound};
pub use transport::{Connector, DEFAULT_RELAY_URL, FrameSink, FrameSource, RelayEndpoint, RelayLink};
pub use websocket::WsConnector;
