use serde::Serialize;

use super::airport::AirportCode;

/// One stop bar (or crossbar) as the local registry knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub airport: AirportCode,
    /// Stable identifier, unique within the airport.
    pub id: String,
    /// Cosmetic label. Equal to `id` when nothing better is known yet.
    pub display_name: String,
    /// `true` = ON (illuminated, stopped), `false` = OFF (clear).
    pub state: bool,
    /// An OFF device with this flag reverts to ON after the auto-raise timeout.
    pub auto_raise: bool,
    /// Paired lead-on lights, driven to the inverse of `state`.
    pub lead_on_id: Option<String>,
}

impl Device {
    /// Whether `display_name` is still the placeholder given at discovery.
    pub fn has_placeholder_name(&self) -> bool {
        self.display_name.is_empty() || self.display_name == self.id
    }
}

/// Registration request, built by profile loaders.
///
/// Defaults follow a freshly loaded profile: ON with auto-raise enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDevice {
    pub airport: AirportCode,
    pub id: String,
    pub display_name: Option<String>,
    pub lead_on_id: Option<String>,
    pub initial_state: bool,
    pub auto_raise: bool,
}

impl NewDevice {
    pub fn new(airport: impl Into<AirportCode>, id: impl Into<String>) -> Self {
        Self {
            airport: airport.into(),
            id: id.into(),
            display_name: None,
            lead_on_id: None,
            initial_state: true,
            auto_raise: true,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn lead_on(mut self, lead_on_id: impl Into<String>) -> Self {
        self.lead_on_id = Some(lead_on_id.into());
        self
    }

    pub fn initial_state(mut self, state: bool) -> Self {
        self.initial_state = state;
        self
    }

    pub fn auto_raise(mut self, auto_raise: bool) -> Self {
        self.auto_raise = auto_raise;
        self
    }
}
