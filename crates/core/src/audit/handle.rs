use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, warn};

use super::{AuditEvent, AuditRecord, Severity};
use crate::metrics;

/// Cloneable sender side of the audit trail.
///
/// Records are stamped when emitted, not when written. Alerts are also
/// logged at error level so they surface without querying the store.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditRecord>) -> Self {
        Self { tx }
    }

    /// Queue an event for the writer, waiting for channel capacity.
    pub async fn emit(&self, event: AuditEvent) {
        let record = AuditRecord::new(event, Utc::now());
        if record.severity == Severity::Alert {
            error!(
                event_type = %record.event_type,
                item_id = record.item_id.as_deref().unwrap_or("-"),
                stage = record.stage.as_deref().unwrap_or("-"),
                "Audit alert"
            );
        }
        if let Err(mpsc::error::SendError(record)) = self.tx.send(record).await {
            metrics::AUDIT_RECORDS_LOST
                .with_label_values(&["writer_gone"])
                .inc();
            warn!(event_type = %record.event_type, "Audit writer gone, record dropped");
        }
    }
}
