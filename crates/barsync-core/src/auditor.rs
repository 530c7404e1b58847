// ── Reconciliation auditor ──
//
// Safety net for lost messages: periodically diff every connected
// airport's registry against its session's relay cache and repair.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::directory::ConnectionDirectory;
use crate::registry::DeviceRegistry;

/// Outcome of one audit pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Connected airports inspected.
    pub airports: usize,
    /// Devices rewritten to the relay's value.
    pub repaired: usize,
    /// Devices the relay did not know, pushed as new.
    pub pushed: usize,
}

#[derive(Clone)]
pub struct ReconciliationAuditor {
    inner: Arc<AuditorInner>,
}

struct AuditorInner {
    directory: ConnectionDirectory,
    registry: DeviceRegistry,
    interval: Duration,
    running: AtomicBool,
}

impl ReconciliationAuditor {
    pub fn new(directory: ConnectionDirectory, registry: DeviceRegistry, interval: Duration) -> Self {
        Self {
            inner: Arc::new(AuditorInner {
                directory,
                registry,
                interval,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Run one pass. Returns `None` if a pass is already in flight.
    pub async fn audit_once(&self) -> Option<AuditReport> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("audit already running, skipping");
            return None;
        }
        let _running = RunningGuard(&self.inner.running);

        let mut report = AuditReport::default();
        for session in self.inner.directory.sessions() {
            if !session.is_connected() {
                continue;
            }
            report.airports += 1;

            let airport = session.airport().clone();
            let relay = session.relay_states();
            for device in self.inner.registry.get_all(&airport) {
                match relay.get(&device.id) {
                    Some(&state) if state != device.state => {
                        tracing::warn!(
                            airport = %airport,
                            object_id = %device.id,
                            local = device.state,
                            relay = state,
                            "desync found, taking relay state"
                        );
                        match self.inner.registry.set_state(
                            &airport,
                            &device.id,
                            state,
                            device.auto_raise,
                            "audit",
                        ) {
                            Ok(_) => report.repaired += 1,
                            Err(e) => tracing::warn!(error = %e, "audit repair failed"),
                        }
                    }
                    Some(_) => {}
                    None => {
                        tracing::info!(
                            airport = %airport,
                            object_id = %device.id,
                            "device unknown to relay, pushing"
                        );
                        // Audit writes are local, so push even while the
                        // session is applying relay input.
                        session.push_device(&device, false).await;
                        report.pushed += 1;
                    }
                }
            }
        }
        Some(report)
    }

    /// Run [`audit_once`](Self::audit_once) every interval until cancelled.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let auditor = self.clone();
        let period = self.inner.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Some(report) = auditor.audit_once().await {
                    if report.repaired > 0 || report.pushed > 0 {
                        tracing::info!(
                            airports = report.airports,
                            repaired = report.repaired,
                            pushed = report.pushed,
                            "audit repaired divergence"
                        );
                    } else {
                        tracing::trace!(airports = report.airports, "audit clean");
                    }
                }
            }
            tracing::debug!("auditor stopped");
        })
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
