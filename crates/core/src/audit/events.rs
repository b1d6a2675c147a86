//! Audit events and the records they are stored as.
//!
//! Item events carry the keys a trail is rebuilt from: the item id, its
//! lineage, the stage involved and the ticket seq the event belongs to.
//! [`AuditRecord`] lifts those keys out of the payload into indexed columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::ItemStatus;

/// How loudly an event should surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    /// Degraded but self-healing: a retryable dispatch failure, a key
    /// marked down.
    Warning,
    /// Needs an operator: an item ended Terminal-Failed or a ticket can
    /// never be routed.
    Alert,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Alert => "alert",
        }
    }

    /// Stored as an ordered integer so `severity >= ?` filters work.
    pub(crate) fn rank(self) -> i64 {
        self as i64
    }

    pub(crate) fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Severity::Info),
            1 => Some(Severity::Warning),
            2 => Some(Severity::Alert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },
    TopologyReloaded {
        queues: usize,
        jobs: usize,
        endpoints: usize,
        actor: String,
    },
    /// A broker alias or service endpoint flipped state.
    ReachabilityChanged {
        key: String,
        reachable: bool,
        reason: Option<String>,
        actor: String,
    },

    ItemSubmitted {
        item_id: String,
        kind: String,
        lineage: String,
        stage: String,
        ticket_seq: u32,
        job: Option<String>,
        actor: String,
    },
    /// A worker report or timeout moved the item.
    StageTransition {
        item_id: String,
        lineage: String,
        ticket_seq: u32,
        from: String,
        to: String,
        outcome: String,
        attempts: u32,
        actor: String,
    },
    ItemResubmitted {
        item_id: String,
        lineage: String,
        ticket_seq: u32,
        from: String,
        to: String,
        attempts: u32,
        actor: String,
    },
    ItemCancelled {
        item_id: String,
        lineage: String,
        ticket_seq: u32,
        from: String,
        actor: String,
        reason: Option<String>,
    },
    /// Emitted after the transition that reached a terminal position.
    ItemTerminated {
        item_id: String,
        lineage: String,
        ticket_seq: u32,
        status: ItemStatus,
        attempts: u32,
    },
    /// A report that did not advance the item.
    DuplicateReport {
        item_id: String,
        lineage: Option<String>,
        stage: String,
        ticket_seq: u32,
        reason: String,
        actor: String,
    },
    DispatchFailed {
        item_id: String,
        lineage: String,
        stage: String,
        ticket_seq: u32,
        error: String,
        retryable: bool,
    },
}

/// The indexed columns of an event. Absent keys do not apply to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditKeys<'a> {
    pub item_id: Option<&'a str>,
    pub lineage: Option<&'a str>,
    pub stage: Option<&'a str>,
    pub ticket_seq: Option<u32>,
    pub actor: Option<&'a str>,
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::TopologyReloaded { .. } => "topology_reloaded",
            Self::ReachabilityChanged { .. } => "reachability_changed",
            Self::ItemSubmitted { .. } => "item_submitted",
            Self::StageTransition { .. } => "stage_transition",
            Self::ItemResubmitted { .. } => "item_resubmitted",
            Self::ItemCancelled { .. } => "item_cancelled",
            Self::ItemTerminated { .. } => "item_terminated",
            Self::DuplicateReport { .. } => "duplicate_report",
            Self::DispatchFailed { .. } => "dispatch_failed",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::DispatchFailed {
                retryable: false, ..
            } => Severity::Alert,
            Self::DispatchFailed { .. } => Severity::Warning,
            Self::ItemTerminated {
                status: ItemStatus::Failed,
                ..
            } => Severity::Alert,
            Self::ReachabilityChanged {
                reachable: false, ..
            } => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn keys(&self) -> AuditKeys<'_> {
        match self {
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } => AuditKeys::default(),
            Self::TopologyReloaded { actor, .. } | Self::ReachabilityChanged { actor, .. } => {
                AuditKeys {
                    actor: Some(actor),
                    ..AuditKeys::default()
                }
            }
            Self::ItemSubmitted {
                item_id,
                lineage,
                stage,
                ticket_seq,
                actor,
                ..
            } => AuditKeys {
                item_id: Some(item_id),
                lineage: Some(lineage),
                stage: Some(stage),
                ticket_seq: Some(*ticket_seq),
                actor: Some(actor),
            },
            Self::StageTransition {
                item_id,
                lineage,
                ticket_seq,
                from,
                actor,
                ..
            }
            | Self::ItemResubmitted {
                item_id,
                lineage,
                ticket_seq,
                from,
                actor,
                ..
            }
            | Self::ItemCancelled {
                item_id,
                lineage,
                ticket_seq,
                from,
                actor,
                ..
            } => AuditKeys {
                item_id: Some(item_id),
                lineage: Some(lineage),
                stage: Some(from),
                ticket_seq: Some(*ticket_seq),
                actor: Some(actor),
            },
            Self::ItemTerminated {
                item_id,
                lineage,
                ticket_seq,
                ..
            } => AuditKeys {
                item_id: Some(item_id),
                lineage: Some(lineage),
                ticket_seq: Some(*ticket_seq),
                ..AuditKeys::default()
            },
            Self::DuplicateReport {
                item_id,
                lineage,
                stage,
                ticket_seq,
                actor,
                ..
            } => AuditKeys {
                item_id: Some(item_id),
                lineage: lineage.as_deref(),
                stage: Some(stage),
                ticket_seq: Some(*ticket_seq),
                actor: Some(actor),
            },
            Self::DispatchFailed {
                item_id,
                lineage,
                stage,
                ticket_seq,
                ..
            } => AuditKeys {
                item_id: Some(item_id),
                lineage: Some(lineage),
                stage: Some(stage),
                ticket_seq: Some(*ticket_seq),
                actor: None,
            },
        }
    }
}

/// A stored event. `id` is assigned by the store; zero until then.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_seq: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    pub fn new(event: AuditEvent, timestamp: DateTime<Utc>) -> Self {
        let keys = event.keys();
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            severity: event.severity(),
            item_id: keys.item_id.map(str::to_string),
            lineage: keys.lineage.map(str::to_string),
            stage: keys.stage.map(str::to_string),
            ticket_seq: keys.ticket_seq,
            actor: keys.actor.map(str::to_string),
            data: event,
        }
    }
}
