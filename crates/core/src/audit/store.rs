use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{AuditRecord, Severity};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        AuditError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        AuditError::Serialization(e.to_string())
    }
}

/// Filter over the indexed record columns. Every set field must match.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub item_id: Option<String>,
    pub lineage: Option<String>,
    pub stage: Option<String>,
    pub event_type: Option<String>,
    pub actor: Option<String>,
    /// Only records at or above this severity.
    pub min_severity: Option<Severity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_lineage(mut self, lineage: impl Into<String>) -> Self {
        self.lineage = Some(lineage.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Only records that need an operator.
    pub fn alerts(self) -> Self {
        self.with_min_severity(Severity::Alert)
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// Durable, append-only audit storage.
pub trait AuditStore: Send + Sync {
    /// Append a batch atomically. Returns how many records were written.
    fn append(&self, records: &[AuditRecord]) -> Result<usize, AuditError>;

    /// Matching records, newest first.
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Matching records, ignoring limit and offset.
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;

    /// Every record of one item in the order it happened: by ticket seq,
    /// then insertion order.
    fn item_trail(&self, item_id: &str) -> Result<Vec<AuditRecord>, AuditError>;
}
