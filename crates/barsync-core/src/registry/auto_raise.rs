// ── Auto-raise safety timer ──
//
// One single-shot task per OFF device with auto-raise enabled. Each arm
// gets a fresh generation number; an expiring task only acts if its
// generation is still the one stored on the entry, so a task that lost
// a race with abort() is a no-op.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::{DeviceEntry, DeviceRegistry};
use crate::model::{AirportCode, Device, Origin, RegistryEvent, StateChange};

pub(super) struct AutoRaiseTimer {
    generation: u64,
    task: AbortHandle,
}

impl AutoRaiseTimer {
    pub(super) fn cancel(self) {
        self.task.abort();
    }
}

impl DeviceRegistry {
    /// Cancel any running timer, then arm a new one if the device is OFF
    /// with auto-raise enabled.
    pub(super) fn rearm(&self, entry: &mut DeviceEntry) {
        if let Some(timer) = entry.timer.take() {
            timer.cancel();
        }
        if !entry.device.state && entry.device.auto_raise {
            entry.timer = self.spawn_auto_raise(&entry.device);
        }
    }

    fn spawn_auto_raise(&self, device: &Device) -> Option<AutoRaiseTimer> {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(
                airport = %device.airport,
                object_id = %device.id,
                "no async runtime, auto-raise not armed"
            );
            return None;
        };

        let generation = self.inner.timer_seq.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::downgrade(&self.inner);
        let airport = device.airport.clone();
        let id = device.id.clone();
        let after = self.inner.auto_raise_after;

        let task = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = registry.upgrade() {
                DeviceRegistry { inner }.expire_auto_raise(&airport, &id, generation);
            }
        });

        Some(AutoRaiseTimer {
            generation,
            task: task.abort_handle(),
        })
    }

    fn expire_auto_raise(&self, airport: &AirportCode, id: &str, generation: u64) {
        let Some(mut devices) = self.inner.airports.get_mut(airport) else {
            return;
        };
        let Some(entry) = devices.get_mut(id) else {
            return;
        };
        if entry.timer.as_ref().map(|timer| timer.generation) != Some(generation) {
            return;
        }
        entry.timer = None;
        if entry.device.state {
            return;
        }

        tracing::info!(airport = %airport, object_id = id, "auto-raise expired, raising stop bar");
        entry.device.state = true;
        self.emit(RegistryEvent::StateChanged(StateChange {
            device: entry.device.clone(),
            tag: entry.tag.clone(),
            origin: Origin::Local,
        }));
    }
}
