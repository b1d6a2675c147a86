use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{AuditHandle, AuditRecord, AuditStore};
use crate::metrics;

/// Most records committed in one transaction.
const MAX_BATCH: usize = 64;

/// Drains the audit channel into the store until every handle is dropped.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditRecord>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditRecord>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Whatever is queued when the writer wakes goes into one transaction.
    /// A failed batch is counted as lost and the writer keeps going.
    pub async fn run(mut self) {
        info!("Audit writer started");

        let mut batch = Vec::with_capacity(MAX_BATCH);
        while self.rx.recv_many(&mut batch, MAX_BATCH).await > 0 {
            match self.store.append(&batch) {
                Ok(written) => {
                    metrics::AUDIT_RECORDS_WRITTEN.inc_by(written as u64);
                    debug!(written, "Audit batch committed");
                }
                Err(e) => {
                    metrics::AUDIT_RECORDS_LOST
                        .with_label_values(&["store_error"])
                        .inc_by(batch.len() as u64);
                    error!(records = batch.len(), error = %e, "Failed to write audit batch");
                }
            }
            batch.clear();
        }

        info!("Audit writer shutting down");
    }
}

/// Build a connected handle and writer. Spawn `writer.run()`; it returns
/// once every clone of the handle is dropped and the channel is drained.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}
