use std::path::Path;
use std::sync::Arc;

use pulse_core::{AuditStore, Config, PipelineOrchestrator, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<PipelineOrchestrator>,
    audit_store: Arc<dyn AuditStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Arc<PipelineOrchestrator>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            audit_store,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    /// Topology document re-read on reload.
    pub fn topology_path(&self) -> &Path {
        &self.config.topology.path
    }
}
