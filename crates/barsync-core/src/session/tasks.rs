// ── Per-link background tasks ──
//
// Spawned by `open`, all three stop when the link's cancellation token
// fires. Failures never end the process; they schedule a recovery.

use barsync_api::{FrameSource, Outbound};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::ConnectionSession;
use crate::model::{Origin, RegistryEvent};

impl ConnectionSession {
    pub(super) async fn receive_loop(self, mut source: Box<dyn FrameSource>, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = source.next_text() => next,
            };

            match next {
                Ok(Some(text)) => self.handle_frame(&text).await,
                Ok(None) => {
                    if !cancel.is_cancelled() {
                        tracing::info!(airport = %self.inner.airport, "relay closed the link");
                        self.disconnect().await;
                    }
                    break;
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracing::warn!(airport = %self.inner.airport, error = %e, "receive failed");
                    self.report(e.to_string());
                    self.schedule_recovery(self.inner.timing.receive_reconnect_delay);
                    break;
                }
            }
        }
        tracing::debug!(airport = %self.inner.airport, "receive loop stopped");
    }

    pub(super) async fn heartbeat_loop(self, cancel: CancellationToken) {
        let period = self.inner.timing.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let silent_for = self.inner.sync.lock().last_received.elapsed();
            if silent_for > self.inner.timing.heartbeat_timeout {
                tracing::warn!(
                    airport = %self.inner.airport,
                    silent_secs = silent_for.as_secs(),
                    "no traffic from relay, treating link as dead"
                );
                self.report("Heartbeat timeout");
                self.schedule_recovery(self.inner.timing.heartbeat_reconnect_delay);
                break;
            }

            tracing::trace!(airport = %self.inner.airport, "sending heartbeat");
            if self.send_frame(&Outbound::Heartbeat).await.is_err() {
                // send_frame already scheduled the recovery.
                break;
            }
        }
    }

    /// Push local registry writes for this airport out to the relay.
    pub(super) async fn registry_listener(
        self,
        mut events: broadcast::Receiver<RegistryEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) => self.on_registry_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        airport = %self.inner.airport,
                        skipped,
                        "registry events lagged, forcing snapshot"
                    );
                    self.request_snapshot(true).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn on_registry_event(&self, event: RegistryEvent) {
        if *event.airport() != self.inner.airport {
            return;
        }

        match event {
            RegistryEvent::StateChanged(change) => {
                if change.origin == Origin::Local {
                    self.push_device(&change.device, false).await;
                }
            }
            RegistryEvent::Registered {
                device,
                origin: Origin::Local,
            } => {
                let deferred = self.inner.sync.lock().deferred_seed;
                if deferred {
                    self.push_device(&device, true).await;
                }
            }
            RegistryEvent::Registered { .. } => {}
            RegistryEvent::LeadOnBound { device } => self.push_device(&device, true).await,
        }
    }
}
