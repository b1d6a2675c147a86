//! Append-only audit trail.
//!
//! Handles stamp each event into an [`AuditRecord`] and queue it; one
//! writer task commits queued records to an [`AuditStore`] in batches.
//! Records are keyed by item, lineage, stage and ticket seq, and carry a
//! [`Severity`] so failures that need an operator can be listed directly.

mod events;
mod handle;
mod sqlite;
mod store;
mod writer;

pub use events::{AuditEvent, AuditKeys, AuditRecord, Severity};
pub use handle::AuditHandle;
pub use sqlite::SqliteAuditStore;
pub use store::{AuditError, AuditFilter, AuditStore};
pub use writer::{create_audit_system, AuditWriter};
