// barsync-core: stop-bar state synchronization between local devices and the BARS relay.

pub mod auditor;
pub mod config;
pub mod directory;
pub mod error;
pub mod hub;
pub mod model;
pub mod registry;
pub mod session;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auditor::{AuditReport, ReconciliationAuditor};
pub use config::{SyncConfig, SyncTiming};
pub use directory::ConnectionDirectory;
pub use error::CoreError;
pub use hub::SyncHub;
pub use model::{AirportCode, ChangeTag, Device, NewDevice, Origin, RegistryEvent, StateChange};
pub use registry::{DeviceRegistry, RegisterOutcome, ToggleOutcome};
pub use session::{ConnectionSession, ConnectionState, RelayNotice, RelayStates};
