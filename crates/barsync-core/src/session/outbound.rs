use barsync_api::Outbound;
use tokio::time::Instant;

use super::ConnectionSession;
use super::pending::PendingUpdate;
use crate::error::CoreError;
use crate::model::Device;

impl ConnectionSession {
    /// Cache and send a device's state plus its paired lead-on.
    ///
    /// The lead-on value is `!state`, or `false` when seeding a pairing
    /// the relay has never seen.
    pub(crate) async fn push_device(&self, device: &Device, force_lead_on_off: bool) {
        let lead_on = device
            .lead_on_id
            .as_ref()
            .map(|id| (id.clone(), !force_lead_on_off && !device.state));

        {
            let mut sync = self.inner.sync.lock();
            sync.cache.insert(device.id.clone(), device.state);
            if let Some((id, state)) = &lead_on {
                sync.cache.insert(id.clone(), *state);
            }
        }
        self.publish_states();

        if !self.is_connected() {
            tracing::debug!(
                airport = %self.inner.airport,
                object_id = %device.id,
                "not connected, update kept in cache"
            );
            return;
        }

        self.send_tracked(&device.id, device.state).await;
        if let Some((id, state)) = lead_on {
            self.send_tracked(&id, state).await;
        }
    }

    /// Send one `STATE_UPDATE` and track it as pending. A new send for the
    /// same object replaces its pending entry.
    async fn send_tracked(&self, object_id: &str, state: bool) {
        self.inner
            .sync
            .lock()
            .pending
            .insert(object_id.to_owned(), PendingUpdate::new(state, Instant::now()));

        let frame = Outbound::state_update(self.inner.airport.as_str(), object_id, state);
        if let Err(e) = self.send_frame(&frame).await {
            tracing::warn!(airport = %self.inner.airport, object_id, error = %e, "state update not sent");
            self.inner.sync.lock().pending.remove(object_id);
            return;
        }
        tracing::debug!(airport = %self.inner.airport, object_id, state, "state update sent");

        if self.mark_verification(object_id) {
            self.schedule_verification();
        }
    }

    /// Flag the object's pending entry as verified-later. False if the
    /// entry is already gone (confirmed while sending) or already flagged.
    pub(super) fn mark_verification(&self, object_id: &str) -> bool {
        let mut sync = self.inner.sync.lock();
        match sync.pending.get_mut(object_id) {
            Some(update) if !update.verification_scheduled => {
                update.verification_scheduled = true;
                true
            }
            _ => false,
        }
    }

    /// Resend a pending value after a conflicting echo. The pending entry
    /// keeps its original send time.
    pub(super) async fn resend(&self, object_id: &str, state: bool) {
        let frame = Outbound::state_update(self.inner.airport.as_str(), object_id, state);
        match self.send_frame(&frame).await {
            Ok(()) => tracing::info!(
                airport = %self.inner.airport,
                object_id,
                state,
                "conflicting echo inside grace window, local value resent"
            ),
            Err(e) => tracing::warn!(airport = %self.inner.airport, object_id, error = %e, "retry not sent"),
        }
    }

    fn schedule_verification(&self) {
        let session = self.clone();
        let delay = self.inner.timing.verification_delay;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = session.inner.closed.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    session.request_snapshot(false).await;
                }
            }
        });
    }

    /// Ask the relay for a full `STATE_SNAPSHOT`.
    ///
    /// No-op when disconnected. Unforced requests are spaced at least
    /// the snapshot interval apart. Returns whether a request was sent.
    pub async fn request_snapshot(&self, force: bool) -> bool {
        if !self.is_connected() {
            return false;
        }

        {
            let now = Instant::now();
            let mut sync = self.inner.sync.lock();
            let recent = sync.last_snapshot_request.is_some_and(|last| {
                now.saturating_duration_since(last) < self.inner.timing.snapshot_min_interval
            });
            if recent && !force {
                tracing::trace!(airport = %self.inner.airport, "snapshot request debounced");
                return false;
            }
            sync.last_snapshot_request = Some(now);
        }

        let frame = Outbound::get_state(
            self.inner.airport.as_str(),
            chrono::Utc::now().timestamp_millis(),
        );
        match self.send_frame(&frame).await {
            Ok(()) => {
                tracing::debug!(airport = %self.inner.airport, force, "snapshot requested");
                true
            }
            Err(e) => {
                tracing::warn!(airport = %self.inner.airport, error = %e, "snapshot request not sent");
                false
            }
        }
    }

    /// Write one frame through the send gate.
    ///
    /// A transport failure reports the error and schedules the
    /// disconnect-wait-reconnect cycle.
    pub(super) async fn send_frame(&self, frame: &Outbound) -> Result<(), CoreError> {
        let text = frame.to_json()?;

        let result = {
            let mut sink = self.inner.sink.lock().await;
            match sink.as_mut() {
                Some(sink) => sink.send_text(text).await,
                None => {
                    return Err(CoreError::NotConnected {
                        airport: self.inner.airport.to_string(),
                    });
                }
            }
        };

        result.map_err(|e| {
            tracing::warn!(
                airport = %self.inner.airport,
                kind = frame.kind(),
                error = %e,
                "send failed"
            );
            self.report(e.to_string());
            self.schedule_recovery(self.inner.timing.heartbeat_reconnect_delay);
            CoreError::from(e).for_airport(self.inner.airport.as_str())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use barsync_api::mock::MockConnector;

    use super::*;
    use crate::config::SyncConfig;
    use crate::registry::DeviceRegistry;

    fn session() -> ConnectionSession {
        ConnectionSession::new(
            "EGLL",
            "ctl-test",
            &SyncConfig::default().with_api_key("test-key"),
            Arc::new(MockConnector::new()),
            DeviceRegistry::default(),
        )
    }

    fn track(session: &ConnectionSession, object_id: &str, state: bool) {
        session
            .inner
            .sync
            .lock()
            .pending
            .insert(object_id.to_owned(), PendingUpdate::new(state, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn verification_marked_once_per_pending_entry() {
        let session = session();

        // Confirmed before the send returned.
        assert!(!session.mark_verification("S1"));

        track(&session, "S1", false);
        assert!(session.mark_verification("S1"));
        assert!(!session.mark_verification("S1"));

        // A new send replaces the entry and is verified again.
        track(&session, "S1", true);
        assert!(session.mark_verification("S1"));
    }
}
