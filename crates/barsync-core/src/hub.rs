// ── SyncHub ──
//
// One registry, one directory and one auditor wired together. This is
// the object an application layer holds.

use std::sync::Arc;

use barsync_api::Connector;
use tokio_util::sync::CancellationToken;

use crate::auditor::ReconciliationAuditor;
use crate::config::SyncConfig;
use crate::directory::ConnectionDirectory;
use crate::registry::DeviceRegistry;

/// The sync engine. Cheaply cloneable.
#[derive(Clone)]
pub struct SyncHub {
    registry: DeviceRegistry,
    directory: ConnectionDirectory,
    auditor: ReconciliationAuditor,
    cancel: CancellationToken,
}

impl SyncHub {
    /// Build the engine and start the audit loop. Must be called inside
    /// a Tokio runtime.
    pub fn new(config: SyncConfig, connector: Arc<dyn Connector>) -> Self {
        let registry = DeviceRegistry::new(&config.timing);
        let audit_interval = config.timing.audit_interval;
        let directory = ConnectionDirectory::new(registry.clone(), connector, config);
        let auditor = ReconciliationAuditor::new(directory.clone(), registry.clone(), audit_interval);

        let cancel = CancellationToken::new();
        auditor.spawn(cancel.clone());

        Self {
            registry,
            directory,
            auditor,
            cancel,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &ConnectionDirectory {
        &self.directory
    }

    pub fn auditor(&self) -> &ReconciliationAuditor {
        &self.auditor
    }

    /// Stop the auditor and disconnect every airport.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.directory.disconnect_all().await;
        tracing::info!("sync hub shut down");
    }
}
