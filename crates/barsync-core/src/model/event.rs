use std::fmt;
use std::sync::Arc;

use super::airport::AirportCode;
use super::device::Device;

/// Who caused a registry write.
///
/// Only a session applying relay input writes with [`Origin::Relay`].
/// Everything else (UI, auto-raise expiry, audit repairs) is
/// [`Origin::Local`] and is pushed back out to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Local,
    Relay,
}

/// Caller-supplied classification carried through to consumers untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ChangeTag(Arc<str>);

impl ChangeTag {
    pub fn new(tag: &str) -> Self {
        Self(Arc::from(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChangeTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for ChangeTag {
    fn from(tag: String) -> Self {
        Self(Arc::from(tag))
    }
}

/// A device's state or auto-raise flag changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// The device after the change.
    pub device: Device,
    pub tag: ChangeTag,
    pub origin: Origin,
}

/// Notifications published by the [`DeviceRegistry`](crate::DeviceRegistry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    StateChanged(StateChange),
    /// A device was registered for the first time.
    Registered { device: Device, origin: Origin },
    /// An existing device learned its lead-on pairing late.
    LeadOnBound { device: Device },
}

impl RegistryEvent {
    pub fn device(&self) -> &Device {
        match self {
            Self::StateChanged(change) => &change.device,
            Self::Registered { device, .. } | Self::LeadOnBound { device } => device,
        }
    }

    pub fn airport(&self) -> &AirportCode {
        &self.device().airport
    }
}
