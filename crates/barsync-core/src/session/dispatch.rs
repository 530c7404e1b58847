// ── Inbound dispatch ──
//
// Called from the receive loop only, one frame at a time in arrival
// order. Grace-window arbitration relies on that ordering.

use std::collections::BTreeMap;

use barsync_api::protocol::{InitialState, RemoteStateUpdate, StateSnapshot};
use barsync_api::Inbound;
use tokio::time::Instant;

use super::pending::{Verdict, arbitrate};
use super::{ConnectionSession, RelayNotice};
use crate::model::Device;

impl ConnectionSession {
    pub(super) async fn handle_frame(&self, text: &str) {
        let message = match Inbound::parse(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(airport = %self.inner.airport, error = %err, "dropping relay frame");
                self.report(format!("Protocol error: {err}"));
                return;
            }
        };

        self.inner.sync.lock().last_received = Instant::now();

        match message {
            Inbound::Heartbeat => {
                tracing::trace!(airport = %self.inner.airport, "heartbeat received");
            }
            Inbound::InitialState(initial) => self.on_initial_state(initial).await,
            Inbound::StateUpdate(update) => self.on_state_update(update).await,
            Inbound::StateSnapshot(snapshot) => self.on_snapshot(snapshot).await,
            Inbound::ControllerConnect(presence) => {
                tracing::info!(
                    airport = %self.inner.airport,
                    controller_id = %presence.controller_id,
                    "controller joined"
                );
                let _ = self.inner.notices.send(RelayNotice::ControllerConnected {
                    controller_id: presence.controller_id,
                });
            }
            Inbound::ControllerDisconnect(presence) => {
                tracing::info!(
                    airport = %self.inner.airport,
                    controller_id = %presence.controller_id,
                    "controller left"
                );
                let _ = self.inner.notices.send(RelayNotice::ControllerDisconnected {
                    controller_id: presence.controller_id,
                });
            }
            Inbound::Error(error) => {
                tracing::warn!(airport = %self.inner.airport, message = %error.message, "relay error");
                self.report(format!("Relay error: {}", error.message));
            }
        }
    }

    // ── INITIAL_STATE ────────────────────────────────────────────────

    async fn on_initial_state(&self, initial: InitialState) {
        let airport = &self.inner.airport;
        tracing::info!(
            airport = %airport,
            connection_type = initial.connection_type.as_deref().unwrap_or("unknown"),
            objects = initial.objects.len(),
            "initial state received"
        );

        let relay: BTreeMap<String, bool> = initial
            .objects
            .iter()
            .map(|object| (object.id.clone(), object.state))
            .collect();

        if relay.is_empty() {
            let local = self.inner.registry.get_all(airport);
            {
                let mut sync = self.inner.sync.lock();
                sync.cache.clear();
                sync.deferred_seed = local.is_empty();
            }
            self.publish_states();

            if local.is_empty() {
                tracing::info!(airport = %airport, "relay is empty, seeding devices as they register");
            } else {
                tracing::info!(airport = %airport, count = local.len(), "relay is empty, seeding local devices");
                for device in &local {
                    self.push_device(device, true).await;
                }
            }
        } else {
            {
                let _applying = self.applying_inbound();
                for (id, &state) in &relay {
                    if self.inner.registry.is_lead_on(airport, id) {
                        continue;
                    }
                    if let Err(e) = self.inner.registry.register_from_relay(airport, id, state) {
                        tracing::warn!(airport = %airport, object_id = %id, error = %e, "relay object not registered");
                    }
                }
            }
            {
                let mut sync = self.inner.sync.lock();
                sync.cache = relay;
                sync.deferred_seed = false;
            }
            self.publish_states();
        }

        self.request_snapshot(false).await;
    }

    // ── STATE_UPDATE ─────────────────────────────────────────────────

    async fn on_state_update(&self, update: RemoteStateUpdate) {
        if update.controller_id.as_deref() == Some(self.inner.controller_id.as_str()) {
            tracing::trace!(object_id = %update.object_id, "ignoring echo of own update");
            return;
        }

        tracing::debug!(
            airport = %self.inner.airport,
            object_id = %update.object_id,
            state = update.state,
            controller_id = update.controller_id.as_deref().unwrap_or("relay"),
            "remote state update"
        );
        tokio::time::sleep(self.inner.timing.inbound_settle_delay).await;

        self.inner
            .sync
            .lock()
            .cache
            .insert(update.object_id.clone(), update.state);
        self.publish_states();

        self.reconcile_object(&update.object_id, update.state).await;
        self.request_snapshot(false).await;
    }

    /// Arbitrate one relay value against local pending state and apply it.
    async fn reconcile_object(&self, object_id: &str, inbound: bool) {
        let airport = &self.inner.airport;

        if self.inner.registry.get(airport, object_id).is_none() {
            if self.inner.registry.is_lead_on(airport, object_id) {
                // Lead-on state follows its primary; only settle bookkeeping.
                self.inner.sync.lock().pending.remove(object_id);
            } else {
                tracing::debug!(airport = %airport, object_id, "update for unknown object ignored");
            }
            return;
        }

        let verdict = {
            let mut sync = self.inner.sync.lock();
            arbitrate(
                &mut sync.pending,
                object_id,
                inbound,
                Instant::now(),
                self.inner.timing.grace_window,
            )
        };

        match verdict {
            Verdict::Confirmed => {
                tracing::debug!(airport = %airport, object_id, state = inbound, "update confirmed by relay");
            }
            Verdict::Retry { target } => self.resend(object_id, target).await,
            Verdict::Accept => {
                let _applying = self.applying_inbound();
                if let Err(e) = self.inner.registry.apply_relay_state(airport, object_id, inbound) {
                    tracing::warn!(airport = %airport, object_id, error = %e, "relay state not applied");
                }
            }
        }
    }

    // ── STATE_SNAPSHOT ───────────────────────────────────────────────

    async fn on_snapshot(&self, snapshot: StateSnapshot) {
        let airport = &self.inner.airport;
        tracing::debug!(
            airport = %airport,
            objects = snapshot.objects.len(),
            offline = snapshot.offline,
            "snapshot received"
        );

        let relay: BTreeMap<String, bool> = snapshot
            .objects
            .iter()
            .map(|object| (object.id.clone(), object.state))
            .collect();

        let mut missing: Vec<Device> = Vec::new();
        for device in self.inner.registry.get_all(airport) {
            match relay.get(&device.id) {
                Some(&state) => self.reconcile_object(&device.id, state).await,
                None => missing.push(device),
            }
        }

        {
            let _applying = self.applying_inbound();
            for (id, &state) in &relay {
                if self.inner.registry.get(airport, id).is_some()
                    || self.inner.registry.is_lead_on(airport, id)
                {
                    continue;
                }
                tracing::info!(airport = %airport, object_id = %id, state, "registering object discovered on relay");
                if let Err(e) = self.inner.registry.register_from_relay(airport, id, state) {
                    tracing::warn!(airport = %airport, object_id = %id, error = %e, "relay object not registered");
                }
            }
        }

        self.inner.sync.lock().cache.extend(relay);
        self.publish_states();

        for device in &missing {
            tracing::info!(airport = %airport, object_id = %device.id, "device unknown to relay, pushing local state");
            self.push_device(device, false).await;
        }
    }
}
