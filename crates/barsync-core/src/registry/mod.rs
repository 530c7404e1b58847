// ── Device registry ──
//
// Authoritative local view of every stop bar, keyed by (airport, id).
// Writes are synchronous and never do I/O. Every accepted change is
// published on a broadcast channel that sessions and UI consumers
// subscribe to.

mod auto_raise;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::SyncTiming;
use crate::error::CoreError;
use crate::model::{AirportCode, ChangeTag, Device, NewDevice, Origin, RegistryEvent, StateChange};

use self::auto_raise::AutoRaiseTimer;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Result of [`DeviceRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    /// The device existed; a missing display name or lead-on was filled in.
    BackFilled,
    Unchanged,
}

/// Result of [`DeviceRegistry::toggle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Applied { state: bool },
    /// Dropped as a duplicate of a toggle moments earlier.
    Debounced,
}

struct DeviceEntry {
    device: Device,
    /// Tag of the last accepted write, reused when auto-raise fires.
    tag: ChangeTag,
    timer: Option<AutoRaiseTimer>,
    last_toggle: Option<Instant>,
}

impl DeviceEntry {
    fn new(device: Device) -> Self {
        Self {
            device,
            tag: ChangeTag::default(),
            timer: None,
            last_toggle: None,
        }
    }
}

/// Shared device registry. Cheaply cloneable.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    airports: DashMap<AirportCode, BTreeMap<String, DeviceEntry>>,
    events: broadcast::Sender<RegistryEvent>,
    timer_seq: AtomicU64,
    toggle_debounce: Duration,
    auto_raise_after: Duration,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(&SyncTiming::default())
    }
}

impl DeviceRegistry {
    pub fn new(timing: &SyncTiming) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                airports: DashMap::new(),
                events,
                timer_seq: AtomicU64::new(0),
                toggle_debounce: timing.toggle_debounce,
                auto_raise_after: timing.auto_raise_after,
            }),
        }
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register a device, or back-fill one that already exists.
    ///
    /// Re-registration never touches `state`, `auto_raise` or the timer.
    /// It only fills in a display name that is still the placeholder and
    /// a lead-on pairing that was unknown. Binding a lead-on late emits
    /// [`RegistryEvent::LeadOnBound`]; a different pairing for a device
    /// that already has one is ignored with a warning.
    pub fn register(&self, new: NewDevice) -> Result<RegisterOutcome, CoreError> {
        self.register_with_origin(new, Origin::Local)
    }

    /// Register an object discovered on the relay.
    pub(crate) fn register_from_relay(
        &self,
        airport: &AirportCode,
        id: &str,
        state: bool,
    ) -> Result<RegisterOutcome, CoreError> {
        let new = NewDevice::new(airport, id)
            .initial_state(state)
            .auto_raise(false);
        self.register_with_origin(new, Origin::Relay)
    }

    fn register_with_origin(
        &self,
        new: NewDevice,
        origin: Origin,
    ) -> Result<RegisterOutcome, CoreError> {
        if new.airport.is_empty() {
            return Err(CoreError::MissingAirport);
        }
        if new.id.is_empty() {
            return Err(CoreError::Config {
                message: format!("device at {} has an empty id", new.airport),
            });
        }

        let mut devices = self.inner.airports.entry(new.airport.clone()).or_default();
        if let Some(entry) = devices.get_mut(&new.id) {
            return Ok(self.back_fill(entry, new));
        }

        let device = Device {
            display_name: new
                .display_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| new.id.clone()),
            lead_on_id: new.lead_on_id.filter(|lead_on| !lead_on.is_empty()),
            airport: new.airport,
            id: new.id,
            state: new.initial_state,
            auto_raise: new.auto_raise,
        };
        tracing::debug!(
            airport = %device.airport,
            object_id = %device.id,
            state = device.state,
            lead_on = ?device.lead_on_id,
            ?origin,
            "device registered"
        );
        devices.insert(device.id.clone(), DeviceEntry::new(device.clone()));
        self.emit(RegistryEvent::Registered { device, origin });
        Ok(RegisterOutcome::Created)
    }

    fn back_fill(&self, entry: &mut DeviceEntry, new: NewDevice) -> RegisterOutcome {
        let mut changed = false;

        if let Some(name) = new.display_name.filter(|name| !name.is_empty() && *name != new.id) {
            if entry.device.has_placeholder_name() {
                entry.device.display_name = name;
                changed = true;
            }
        }

        let mut bound = false;
        if let Some(lead_on) = new.lead_on_id.filter(|lead_on| !lead_on.is_empty()) {
            match entry.device.lead_on_id.as_deref() {
                None => bound = true,
                Some(existing) if existing != lead_on.as_str() => {
                    tracing::warn!(
                        airport = %entry.device.airport,
                        object_id = %entry.device.id,
                        kept = existing,
                        ignored = %lead_on,
                        "conflicting lead-on pairing, keeping the first one"
                    );
                }
                Some(_) => {}
            }
            if bound {
                entry.device.lead_on_id = Some(lead_on);
                changed = true;
            }
        }

        if bound {
            tracing::debug!(
                airport = %entry.device.airport,
                object_id = %entry.device.id,
                lead_on = ?entry.device.lead_on_id,
                "lead-on bound late"
            );
            self.emit(RegistryEvent::LeadOnBound {
                device: entry.device.clone(),
            });
        }

        if changed {
            RegisterOutcome::BackFilled
        } else {
            RegisterOutcome::Unchanged
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Set a device's state and auto-raise flag as a local write.
    ///
    /// Returns `Ok(false)` when both values are already current; nothing
    /// is emitted and the timer is left alone.
    pub fn set_state(
        &self,
        airport: &AirportCode,
        id: &str,
        state: bool,
        auto_raise: bool,
        tag: impl Into<ChangeTag>,
    ) -> Result<bool, CoreError> {
        self.write_state(airport, id, state, Some(auto_raise), tag.into(), Origin::Local)
    }

    /// Flip a device's state as a local write, dropping repeats within
    /// the toggle debounce window.
    pub fn toggle(
        &self,
        airport: &AirportCode,
        id: &str,
        auto_raise: bool,
        tag: impl Into<ChangeTag>,
    ) -> Result<ToggleOutcome, CoreError> {
        let mut devices = self
            .inner
            .airports
            .get_mut(airport)
            .ok_or_else(|| not_found(airport, id))?;
        let entry = devices.get_mut(id).ok_or_else(|| not_found(airport, id))?;

        let now = Instant::now();
        if entry
            .last_toggle
            .is_some_and(|last| now.duration_since(last) < self.inner.toggle_debounce)
        {
            tracing::trace!(airport = %airport, object_id = id, "toggle debounced");
            return Ok(ToggleOutcome::Debounced);
        }
        entry.last_toggle = Some(now);

        let state = !entry.device.state;
        self.apply(entry, state, auto_raise, tag.into(), Origin::Local);
        Ok(ToggleOutcome::Applied { state })
    }

    /// Write a relay-authoritative value. Keeps the device's auto-raise flag.
    pub(crate) fn apply_relay_state(
        &self,
        airport: &AirportCode,
        id: &str,
        state: bool,
    ) -> Result<bool, CoreError> {
        self.write_state(airport, id, state, None, ChangeTag::new("relay"), Origin::Relay)
    }

    fn write_state(
        &self,
        airport: &AirportCode,
        id: &str,
        state: bool,
        auto_raise: Option<bool>,
        tag: ChangeTag,
        origin: Origin,
    ) -> Result<bool, CoreError> {
        let mut devices = self
            .inner
            .airports
            .get_mut(airport)
            .ok_or_else(|| not_found(airport, id))?;
        let entry = devices.get_mut(id).ok_or_else(|| not_found(airport, id))?;
        let auto_raise = auto_raise.unwrap_or(entry.device.auto_raise);
        Ok(self.apply(entry, state, auto_raise, tag, origin))
    }

    fn apply(
        &self,
        entry: &mut DeviceEntry,
        state: bool,
        auto_raise: bool,
        tag: ChangeTag,
        origin: Origin,
    ) -> bool {
        if entry.device.state == state && entry.device.auto_raise == auto_raise {
            return false;
        }

        entry.device.state = state;
        entry.device.auto_raise = auto_raise;
        entry.tag = tag.clone();
        self.rearm(entry);

        tracing::debug!(
            airport = %entry.device.airport,
            object_id = %entry.device.id,
            state,
            auto_raise,
            tag = %tag,
            ?origin,
            "device state changed"
        );
        self.emit(RegistryEvent::StateChanged(StateChange {
            device: entry.device.clone(),
            tag,
            origin,
        }));
        true
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, airport: &AirportCode, id: &str) -> Option<Device> {
        self.inner
            .airports
            .get(airport)?
            .get(id)
            .map(|entry| entry.device.clone())
    }

    /// All devices at an airport, ordered by id.
    pub fn get_all(&self, airport: &AirportCode) -> Vec<Device> {
        self.inner
            .airports
            .get(airport)
            .map(|devices| devices.values().map(|entry| entry.device.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_devices(&self, airport: &AirportCode) -> bool {
        self.inner
            .airports
            .get(airport)
            .is_some_and(|devices| !devices.is_empty())
    }

    /// Whether `id` is the lead-on of some device at the airport.
    pub fn is_lead_on(&self, airport: &AirportCode, id: &str) -> bool {
        self.inner.airports.get(airport).is_some_and(|devices| {
            devices
                .values()
                .any(|entry| entry.device.lead_on_id.as_deref() == Some(id))
        })
    }

    /// Airports with at least one registered device, sorted.
    pub fn airports(&self) -> Vec<AirportCode> {
        let mut airports: Vec<AirportCode> = self
            .inner
            .airports
            .iter()
            .filter(|devices| !devices.is_empty())
            .map(|devices| devices.key().clone())
            .collect();
        airports.sort();
        airports
    }

    /// Drop every device at an airport and cancel their timers.
    pub fn remove_airport(&self, airport: &AirportCode) -> Vec<Device> {
        let Some((_, devices)) = self.inner.airports.remove(airport) else {
            return Vec::new();
        };
        tracing::info!(airport = %airport, count = devices.len(), "airport removed from registry");
        devices
            .into_values()
            .map(|mut entry| {
                if let Some(timer) = entry.timer.take() {
                    timer.cancel();
                }
                entry.device
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn emit(&self, event: RegistryEvent) {
        // No receivers is fine: nothing is listening yet.
        let _ = self.inner.events.send(event);
    }
}

fn not_found(airport: &AirportCode, id: &str) -> CoreError {
    CoreError::DeviceNotFound {
        airport: airport.to_string(),
        id: id.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    fn egll() -> AirportCode {
        AirportCode::new("EGLL")
    }

    fn drain(rx: &mut broadcast::Receiver<RegistryEvent>) -> Vec<RegistryEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
                Err(TryRecvError::Lagged(_)) => {}
            }
        }
    }

    #[tokio::test]
    async fn register_defaults_and_normalizes_airport() {
        let registry = DeviceRegistry::default();
        let outcome = registry.register(NewDevice::new(" egll ", "S1")).unwrap();
        assert_eq!(outcome, RegisterOutcome::Created);

        let device = registry.get(&egll(), "S1").unwrap();
        assert!(device.state);
        assert!(device.auto_raise);
        assert_eq!(device.display_name, "S1");
        assert_eq!(registry.airports(), vec![egll()]);
    }

    #[tokio::test]
    async fn register_rejects_blank_airport() {
        let registry = DeviceRegistry::default();
        assert!(matches!(
            registry.register(NewDevice::new("  ", "S1")),
            Err(CoreError::MissingAirport)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn re_registration_keeps_state_timer_and_emits_nothing() {
        let registry = DeviceRegistry::default();
        let new = NewDevice::new("EGLL", "S1").display_name("A1 hold").lead_on("L1");
        registry.register(new.clone()).unwrap();
        registry.set_state(&egll(), "S1", false, true, "ui").unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        let mut rx = registry.subscribe();
        assert_eq!(registry.register(new.initial_state(true)).unwrap(), RegisterOutcome::Unchanged);
        assert!(!registry.get(&egll(), "S1").unwrap().state);
        assert!(drain(&mut rx).is_empty());

        // Still raised at the deadline armed by the original write.
        tokio::time::sleep(Duration::from_secs(24)).await;
        assert!(!registry.get(&egll(), "S1").unwrap().state);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.get(&egll(), "S1").unwrap().state);
    }

    #[tokio::test]
    async fn back_fill_name_and_lead_on() {
        let registry = DeviceRegistry::default();
        registry.register_from_relay(&egll(), "S1", false).unwrap();

        let mut rx = registry.subscribe();
        let outcome = registry
            .register(NewDevice::new("EGLL", "S1").display_name("A1 hold").lead_on("L1"))
            .unwrap();
        assert_eq!(outcome, RegisterOutcome::BackFilled);

        let device = registry.get(&egll(), "S1").unwrap();
        assert_eq!(device.display_name, "A1 hold");
        assert_eq!(device.lead_on_id.as_deref(), Some("L1"));
        assert!(!device.state);
        assert!(!device.auto_raise);

        let events = drain(&mut rx);
        assert_eq!(events, vec![RegistryEvent::LeadOnBound { device }]);
    }

    #[tokio::test]
    async fn conflicting_lead_on_keeps_first() {
        let registry = DeviceRegistry::default();
        registry.register(NewDevice::new("EGLL", "S1").lead_on("L1")).unwrap();

        let outcome = registry.register(NewDevice::new("EGLL", "S1").lead_on("L9")).unwrap();
        assert_eq!(outcome, RegisterOutcome::Unchanged);
        assert_eq!(registry.get(&egll(), "S1").unwrap().lead_on_id.as_deref(), Some("L1"));
        assert!(registry.is_lead_on(&egll(), "L1"));
        assert!(!registry.is_lead_on(&egll(), "L9"));
    }

    #[tokio::test]
    async fn set_state_is_noop_when_unchanged() {
        let registry = DeviceRegistry::default();
        registry.register(NewDevice::new("EGLL", "S1")).unwrap();
        let mut rx = registry.subscribe();

        assert!(!registry.set_state(&egll(), "S1", true, true, "ui").unwrap());
        assert!(drain(&mut rx).is_empty());

        assert!(registry.set_state(&egll(), "S1", false, true, "ui").unwrap());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let RegistryEvent::StateChanged(change) = &events[0] else {
            panic!("expected StateChanged");
        };
        assert_eq!(change.tag.as_str(), "ui");
        assert_eq!(change.origin, Origin::Local);
        assert!(!change.device.state);
    }

    #[tokio::test]
    async fn unknown_device_is_an_error() {
        let registry = DeviceRegistry::default();
        assert!(matches!(
            registry.set_state(&egll(), "S1", false, true, "ui"),
            Err(CoreError::DeviceNotFound { .. })
        ));
        assert!(matches!(
            registry.toggle(&egll(), "S1", true, "ui"),
            Err(CoreError::DeviceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn relay_write_keeps_auto_raise_and_marks_origin() {
        let registry = DeviceRegistry::default();
        registry.register(NewDevice::new("EGLL", "S1").auto_raise(false)).unwrap();
        let mut rx = registry.subscribe();

        assert!(registry.apply_relay_state(&egll(), "S1", false).unwrap());
        let device = registry.get(&egll(), "S1").unwrap();
        assert!(!device.auto_raise);

        let events = drain(&mut rx);
        let RegistryEvent::StateChanged(change) = &events[0] else {
            panic!("expected StateChanged");
        };
        assert_eq!(change.origin, Origin::Relay);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_debounces_repeats() {
        let registry = DeviceRegistry::default();
        registry.register(NewDevice::new("EGLL", "S1")).unwrap();

        assert_eq!(
            registry.toggle(&egll(), "S1", true, "ui").unwrap(),
            ToggleOutcome::Applied { state: false }
        );
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(registry.toggle(&egll(), "S1", true, "ui").unwrap(), ToggleOutcome::Debounced);
        assert!(!registry.get(&egll(), "S1").unwrap().state);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(
            registry.toggle(&egll(), "S1", true, "ui").unwrap(),
            ToggleOutcome::Applied { state: true }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auto_raise_fires_after_timeout() {
        let registry = DeviceRegistry::default();
        registry.register(NewDevice::new("EGLL", "S1")).unwrap();
        registry.set_state(&egll(), "S1", false, true, "ui").unwrap();
        let mut rx = registry.subscribe();

        tokio::time::sleep(Duration::from_secs(44)).await;
        assert!(!registry.get(&egll(), "S1").unwrap().state);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.get(&egll(), "S1").unwrap().state);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let RegistryEvent::StateChanged(change) = &events[0] else {
            panic!("expected StateChanged");
        };
        assert_eq!(change.origin, Origin::Local);
        assert_eq!(change.tag.as_str(), "ui");
        assert!(change.device.state);
    }

    #[tokio::test(start_paused = true)]
    async fn intervening_write_reschedules_auto_raise() {
        let registry = DeviceRegistry::default();
        registry.register(NewDevice::new("EGLL", "S1")).unwrap();
        registry.set_state(&egll(), "S1", false, true, "ui").unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        registry.set_state(&egll(), "S1", true, true, "ui").unwrap();
        registry.set_state(&egll(), "S1", false, true, "ui").unwrap();

        // Original deadline (45s) passes without effect.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!registry.get(&egll(), "S1").unwrap().state);

        // Rescheduled deadline is 30s + 45s.
        tokio::time::sleep(Duration::from_secs(26)).await;
        assert!(registry.get(&egll(), "S1").unwrap().state);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_raise_disabled_or_removed_airport_never_fires() {
        let registry = DeviceRegistry::default();
        registry.register(NewDevice::new("EGLL", "S1")).unwrap();
        registry.register(NewDevice::new("EGLL", "S2")).unwrap();
        registry.set_state(&egll(), "S1", false, false, "ui").unwrap();
        registry.set_state(&egll(), "S2", false, true, "ui").unwrap();

        let removed = registry.remove_airport(&egll());
        assert_eq!(removed.len(), 2);
        registry.register(NewDevice::new("EGLL", "S2").initial_state(false)).unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!registry.get(&egll(), "S2").unwrap().state);
        assert!(registry.get(&egll(), "S1").is_none());
    }

    #[tokio::test]
    async fn get_all_is_sorted() {
        let registry = DeviceRegistry::default();
        for id in ["S3", "S1", "S2"] {
            registry.register(NewDevice::new("EGLL", id)).unwrap();
        }
        let ids: Vec<String> = registry.get_all(&egll()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["S1", "S2", "S3"]);
        assert!(registry.get_all(&AirportCode::new("KJFK")).is_empty());
    }
}
