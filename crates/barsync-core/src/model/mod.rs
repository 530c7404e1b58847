// ── Domain model ──
//
// Canonical representation of stop bars and the events the registry
// publishes about them. Sessions, the auditor and UI consumers all
// depend on these types rather than on wire payloads.

pub mod airport;
pub mod device;
pub mod event;

// ── Re-exports ──────────────────────────────────────────────────────

pub use airport::AirportCode;
pub use device::{Device, NewDevice};
pub use event::{ChangeTag, Origin, RegistryEvent, StateChange};
