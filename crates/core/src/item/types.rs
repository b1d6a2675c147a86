//! Core item data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an item is. Carried in every work ticket so workers can pick a
/// handler without looking the item up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Submission Information Package bound for the archival store.
    Sip,
    /// A crawl target URI.
    CrawlUri,
    /// A URI-to-index or URI-to-doc record.
    DatasetRecord,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Sip => "sip",
            ItemKind::CrawlUri => "crawl_uri",
            ItemKind::DatasetRecord => "dataset_record",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sip" => Ok(ItemKind::Sip),
            "crawl_uri" => Ok(ItemKind::CrawlUri),
            "dataset_record" => Ok(ItemKind::DatasetRecord),
            other => Err(format!("unknown item kind: {}", other)),
        }
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Worker reported the stage done.
    Success,
    /// Worker reported the stage failed.
    Failure,
    /// No report arrived before the stage deadline.
    Timeout,
    /// Operator sent the item back from its error stage.
    Resubmit,
    /// Operator withdrew the item.
    Cancel,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
            Outcome::Resubmit => "resubmit",
            Outcome::Cancel => "cancel",
        }
    }

    /// Failure and Timeout share routing.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure | Outcome::Timeout)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an item currently is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Position {
    /// Waiting at (or being processed by) a catalog-backed stage.
    Stage { stage: String },
    TerminalSuccess,
    TerminalFailed,
}

impl Position {
    pub fn stage(stage: impl Into<String>) -> Self {
        Position::Stage {
            stage: stage.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Position::Stage { .. })
    }

    pub fn stage_id(&self) -> Option<&str> {
        match self {
            Position::Stage { stage } => Some(stage),
            _ => None,
        }
    }

    pub fn status(&self) -> ItemStatus {
        match self {
            Position::Stage { .. } => ItemStatus::InFlight,
            Position::TerminalSuccess => ItemStatus::Succeeded,
            Position::TerminalFailed => ItemStatus::Failed,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Stage { stage } => f.write_str(stage),
            Position::TerminalSuccess => f.write_str("Terminal-Success"),
            Position::TerminalFailed => f.write_str("Terminal-Failed"),
        }
    }
}

/// Coarse lifecycle status, used for filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InFlight,
    Succeeded,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::InFlight => "in_flight",
            ItemStatus::Succeeded => "succeeded",
            ItemStatus::Failed => "failed",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_flight" => Ok(ItemStatus::InFlight),
            "succeeded" => Ok(ItemStatus::Succeeded),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(format!("unknown item status: {}", other)),
        }
    }
}

/// One recorded transition. History rows are never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Zero-based position in the item's history.
    pub seq: u32,
    pub from: Position,
    pub outcome: Outcome,
    pub to: Position,
    pub at: DateTime<Utc>,
    /// Who caused the transition (worker id, operator, `timeout-sweeper`).
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The unit of work moving through a lineage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub kind: ItemKind,
    /// Lineage this item belongs to; fixed at submission.
    pub lineage: String,
    /// Job key (`weekly-2`, ...) the item was produced by, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    pub position: Position,
    /// Failures and timeouts so far.
    pub attempts: u32,
    /// Parked at a QA stage waiting for an operator decision.
    pub held: bool,
    /// Whether the ticket for the current position was confirmed published.
    pub dispatched: bool,
    /// Stage that routed the item to its error stage, if it is there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    /// Stage input forwarded to workers.
    pub payload: serde_json::Value,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the item entered its current position.
    pub stage_entered_at: DateTime<Utc>,
}

impl Item {
    pub fn current_stage(&self) -> Option<&str> {
        self.position.stage_id()
    }

    pub fn is_terminal(&self) -> bool {
        self.position.is_terminal()
    }

    pub fn status(&self) -> ItemStatus {
        self.position.status()
    }

    /// Sequence number a worker must echo when reporting on the current
    /// stage: the history length at the time the ticket was issued.
    pub fn ticket_seq(&self) -> u32 {
        self.history.len() as u32
    }

    pub fn last_history(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }
}
