//! Per-item state machine.
//!
//! Every mutation of an item happens under that item's mutex and is
//! persisted (history row + item row, one transaction) before the caller
//! gets a [`DispatchOrder`]. Items in different lineages or with different
//! ids never contend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Lineage, PipelineDefinition, PipelineError, Target};
use crate::config::PipelineConfig;
use crate::item::{HistoryEntry, Item, ItemKind, ItemStore, Outcome, Position};
use crate::metrics;

/// Request to put a new item into the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Caller-chosen id; a UUID is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub kind: ItemKind,
    /// Entry stage (`FC-SIPS`, `PULSE01`, `PULSE10`, `DC2`, ...).
    pub stage: String,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A worker's verdict on one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub item_id: String,
    pub stage: String,
    /// `ticket_seq` from the work ticket being reported on.
    pub ticket_seq: u32,
    pub outcome: Outcome,
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_actor() -> String {
    "worker".to_string()
}

/// Instruction to publish a work ticket for an item's current stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOrder {
    pub item_id: String,
    pub kind: ItemKind,
    pub lineage: String,
    pub stage: String,
    pub attempt: u32,
    pub ticket_seq: u32,
    pub job: Option<String>,
    pub payload: serde_json::Value,
}

impl DispatchOrder {
    fn for_item(item: &Item) -> Option<Self> {
        let stage = item.current_stage()?;
        Some(Self {
            item_id: item.id.clone(),
            kind: item.kind,
            lineage: item.lineage.clone(),
            stage: stage.to_string(),
            attempt: item.attempts,
            ticket_seq: item.ticket_seq(),
            job: item.job.clone(),
            payload: item.payload.clone(),
        })
    }
}

/// A recorded transition and, if the item moved to a stage, what to publish.
#[derive(Debug, Clone)]
pub struct Transition {
    pub item: Item,
    pub entry: HistoryEntry,
    pub order: Option<DispatchOrder>,
}

/// Why a report was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DuplicateReason {
    /// The item already reached a terminal state.
    Terminal,
    /// The item has moved on from the reported stage.
    StageMismatch { current: String },
    /// The report echoes an older ticket for this stage.
    StaleTicket { current_seq: u32 },
    /// The item is parked for QA; only Success moves it.
    Held,
}

impl DuplicateReason {
    pub fn label(&self) -> &'static str {
        match self {
            DuplicateReason::Terminal => "terminal",
            DuplicateReason::StageMismatch { .. } => "stage_mismatch",
            DuplicateReason::StaleTicket { .. } => "stale_ticket",
            DuplicateReason::Held => "held",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReportResult {
    Applied(Transition),
    Duplicate {
        item_id: String,
        reason: DuplicateReason,
    },
}

impl ReportResult {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ReportResult::Duplicate { .. })
    }
}

/// Exclusive right to publish one item's current ticket. Released on drop.
pub struct PublishClaim<'a> {
    claims: &'a DashMap<String, u32>,
    item_id: String,
}

impl Drop for PublishClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.item_id);
    }
}

/// The pipeline state machine.
pub struct PipelineMachine {
    definition: Arc<PipelineDefinition>,
    config: PipelineConfig,
    store: Arc<dyn ItemStore>,
    in_flight: DashMap<String, Arc<Mutex<Item>>>,
    /// Items with a publish in progress, by ticket seq.
    publishing: DashMap<String, u32>,
}

impl PipelineMachine {
    pub fn new(
        definition: Arc<PipelineDefinition>,
        config: PipelineConfig,
        store: Arc<dyn ItemStore>,
    ) -> Self {
        Self {
            definition,
            config,
            store,
            in_flight: DashMap::new(),
            publishing: DashMap::new(),
        }
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    /// Load every non-terminal item from the store into the in-flight set.
    pub fn recover(&self) -> Result<usize, PipelineError> {
        let items = self.store.list_in_flight()?;
        let count = items.len();
        for item in items {
            self.in_flight
                .entry(item.id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(item)));
        }
        metrics::ITEMS_IN_FLIGHT.set(self.in_flight.len() as i64);
        Ok(count)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Create an item at an entry stage. History starts empty.
    pub async fn submit(&self, request: SubmitRequest) -> Result<(Item, DispatchOrder), PipelineError> {
        let lineage = self.lineage_for(&request.stage)?;
        if !lineage.is_entry(&request.stage) {
            return Err(PipelineError::NotAnEntryStage(request.stage));
        }

        let now = Utc::now();
        let item = Item {
            id: request
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            kind: request.kind,
            lineage: lineage.name.clone(),
            job: request.job,
            position: Position::stage(&request.stage),
            attempts: 0,
            held: false,
            dispatched: false,
            failed_stage: None,
            payload: request.payload,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            stage_entered_at: now,
        };

        self.store.create(&item)?;
        let order = DispatchOrder::for_item(&item)
            .ok_or_else(|| PipelineError::UnknownStage(request.stage.clone()))?;
        self.in_flight
            .insert(item.id.clone(), Arc::new(Mutex::new(item.clone())));

        metrics::ITEMS_SUBMITTED
            .with_label_values(&[&item.lineage])
            .inc();
        metrics::ITEMS_IN_FLIGHT.set(self.in_flight.len() as i64);
        info!(item_id = %item.id, stage = %request.stage, lineage = %item.lineage, "Item submitted");

        Ok((item, order))
    }

    /// Apply a worker report, or record it as a duplicate.
    pub async fn report(&self, report: StageReport) -> Result<ReportResult, PipelineError> {
        if !matches!(
            report.outcome,
            Outcome::Success | Outcome::Failure | Outcome::Timeout
        ) {
            return Err(PipelineError::NoTransition {
                stage: report.stage,
                outcome: report.outcome,
            });
        }

        let slot = self.slot(&report.item_id)?;
        let mut item = slot.lock().await;

        if let Some(reason) = duplicate_reason(&item, &report) {
            metrics::DUPLICATE_REPORTS
                .with_label_values(&[reason.label()])
                .inc();
            warn!(
                item_id = %report.item_id,
                stage = %report.stage,
                ticket_seq = report.ticket_seq,
                reason = reason.label(),
                "Duplicate report ignored"
            );
            return Ok(ReportResult::Duplicate {
                item_id: report.item_id,
                reason,
            });
        }

        let lineage = self.lineage_for(&report.stage)?;
        if lineage.is_error_stage(&report.stage) {
            return Err(PipelineError::NoTransition {
                stage: report.stage,
                outcome: report.outcome,
            });
        }

        let mut attempts = item.attempts;
        let mut failed_stage = None;
        let target = match (report.outcome, lineage.edge(&report.stage, report.outcome)) {
            (_, Some(target)) => target.clone(),
            (Outcome::Success, None) => {
                return Err(PipelineError::NoTransition {
                    stage: report.stage,
                    outcome: report.outcome,
                })
            }
            (_, None) => {
                attempts += 1;
                match lineage.error_stage {
                    Some(ref error_stage) if attempts <= self.config.max_attempts => {
                        failed_stage = Some(report.stage.clone());
                        Target::Stage(error_stage.clone())
                    }
                    _ => Target::TerminalFailed,
                }
            }
        };

        let transition = self.apply(
            &mut item,
            Step {
                target,
                outcome: report.outcome,
                attempts,
                failed_stage,
                actor: report.actor,
                note: report.note,
            },
        )?;
        Ok(ReportResult::Applied(transition))
    }

    /// Send an item from its lineage's error stage back into the lineage.
    pub async fn resubmit(
        &self,
        item_id: &str,
        actor: &str,
        note: Option<String>,
    ) -> Result<Transition, PipelineError> {
        let slot = self.slot(item_id)?;
        let mut item = slot.lock().await;

        let stage = match item.current_stage() {
            Some(stage) => stage.to_string(),
            None => return Err(invalid_state(&item, "resubmit")),
        };
        let lineage = self.lineage_for(&stage)?;
        if !lineage.is_error_stage(&stage) {
            return Err(invalid_state(&item, "resubmit"));
        }
        if item.attempts > self.config.max_attempts {
            return Err(PipelineError::AttemptsExhausted {
                item_id: item.id.clone(),
                attempts: item.attempts,
                max_attempts: self.config.max_attempts,
            });
        }
        let target = lineage
            .resubmit_stage(item.failed_stage.as_deref())
            .ok_or_else(|| PipelineError::NoTransition {
                stage: stage.clone(),
                outcome: Outcome::Resubmit,
            })?
            .to_string();

        let attempts = item.attempts;
        self.apply(
            &mut item,
            Step {
                target: Target::Stage(target),
                outcome: Outcome::Resubmit,
                attempts,
                failed_stage: None,
                actor: actor.to_string(),
                note,
            },
        )
    }

    /// Withdraw an item. It goes straight to Terminal-Failed; any report
    /// arriving afterwards is a duplicate.
    pub async fn cancel(
        &self,
        item_id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Transition, PipelineError> {
        let slot = self.slot(item_id)?;
        let mut item = slot.lock().await;

        if item.is_terminal() {
            return Err(invalid_state(&item, "cancel"));
        }

        let attempts = item.attempts;
        let failed_stage = item.failed_stage.clone();
        self.apply(
            &mut item,
            Step {
                target: Target::TerminalFailed,
                outcome: Outcome::Cancel,
                attempts,
                failed_stage,
                actor: actor.to_string(),
                note: reason,
            },
        )
    }

    /// Record that the ticket `ticket_seq` was published. Returns false if
    /// the item has moved on since the order was issued.
    pub async fn mark_dispatched(&self, item_id: &str, ticket_seq: u32) -> Result<bool, PipelineError> {
        let slot = match self.in_flight.get(item_id) {
            Some(slot) => Arc::clone(slot.value()),
            None => return Ok(false),
        };
        let mut item = slot.lock().await;
        if item.is_terminal() || item.ticket_seq() != ticket_seq || item.dispatched {
            return Ok(false);
        }
        let mut next = item.clone();
        next.dispatched = true;
        self.store.save(&next)?;
        *item = next;
        Ok(true)
    }

    /// Claim the publish of `order`. Returns `None` while another publish
    /// for the same item is still in progress.
    pub fn claim_publish(&self, order: &DispatchOrder) -> Option<PublishClaim<'_>> {
        match self.publishing.entry(order.item_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(order.ticket_seq);
                Some(PublishClaim {
                    claims: &self.publishing,
                    item_id: order.item_id.clone(),
                })
            }
        }
    }

    pub fn is_publishing(&self, item_id: &str) -> bool {
        self.publishing.contains_key(item_id)
    }

    /// Whether `order` still describes the item's current, unpublished
    /// ticket. Orders for items that were cancelled or moved on are stale.
    pub async fn is_current(&self, order: &DispatchOrder) -> bool {
        let slot = match self.in_flight.get(&order.item_id) {
            Some(slot) => Arc::clone(slot.value()),
            None => return false,
        };
        let item = slot.lock().await;
        !item.is_terminal()
            && !item.held
            && item.ticket_seq() == order.ticket_seq
            && item.current_stage() == Some(order.stage.as_str())
    }

    /// Current state of an item, in flight or archived.
    pub async fn get(&self, item_id: &str) -> Result<Item, PipelineError> {
        let slot = self.in_flight.get(item_id).map(|s| Arc::clone(s.value()));
        match slot {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => self
                .store
                .get(item_id)?
                .ok_or_else(|| PipelineError::ItemNotFound(item_id.to_string())),
        }
    }

    pub async fn history(&self, item_id: &str) -> Result<Vec<HistoryEntry>, PipelineError> {
        Ok(self.get(item_id).await?.history)
    }

    /// Copies of every in-flight item.
    pub async fn in_flight_items(&self) -> Vec<Item> {
        let slots: Vec<Arc<Mutex<Item>>> = self
            .in_flight
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut items = Vec::with_capacity(slots.len());
        for slot in slots {
            let item = slot.lock().await;
            if !item.is_terminal() {
                items.push(item.clone());
            }
        }
        items
    }

    /// Orders for items whose current ticket was never confirmed published,
    /// is not being published right now, and that entered their stage
    /// before `entered_before`.
    pub async fn pending_dispatch(&self, entered_before: DateTime<Utc>) -> Vec<DispatchOrder> {
        self.in_flight_items()
            .await
            .into_iter()
            .filter(|item| !item.dispatched && !item.held && item.stage_entered_at <= entered_before)
            .filter(|item| !self.is_publishing(&item.id))
            .filter_map(|item| DispatchOrder::for_item(&item))
            .collect()
    }

    /// Timeout reports for dispatched items past their stage deadline.
    /// Error stages and held items have no deadline.
    pub async fn overdue(&self, now: DateTime<Utc>) -> Vec<StageReport> {
        self.in_flight_items()
            .await
            .into_iter()
            .filter_map(|item| {
                let stage = item.current_stage()?.to_string();
                if item.held || !item.dispatched {
                    return None;
                }
                let lineage = self.definition.lineage_of(&stage)?;
                if lineage.is_error_stage(&stage) {
                    return None;
                }
                let timeout = self.config.stage_timeout_secs(&stage);
                let elapsed = now.signed_duration_since(item.stage_entered_at);
                if elapsed.num_seconds() < 0 || (elapsed.num_seconds() as u64) < timeout {
                    return None;
                }
                Some(StageReport {
                    item_id: item.id.clone(),
                    stage,
                    ticket_seq: item.ticket_seq(),
                    outcome: Outcome::Timeout,
                    actor: "timeout-sweeper".to_string(),
                    note: Some(format!("no report within {}s", timeout)),
                })
            })
            .collect()
    }

    fn lineage_for(&self, stage: &str) -> Result<&Lineage, PipelineError> {
        self.definition
            .lineage_of(stage)
            .ok_or_else(|| PipelineError::UnknownStage(stage.to_string()))
    }

    /// The shared slot for an item. Terminal items get a detached slot so
    /// they never re-enter the in-flight set.
    fn slot(&self, item_id: &str) -> Result<Arc<Mutex<Item>>, PipelineError> {
        if let Some(slot) = self.in_flight.get(item_id) {
            return Ok(Arc::clone(slot.value()));
        }
        let item = self
            .store
            .get(item_id)?
            .ok_or_else(|| PipelineError::ItemNotFound(item_id.to_string()))?;
        if item.is_terminal() {
            return Ok(Arc::new(Mutex::new(item)));
        }
        let slot = self
            .in_flight
            .entry(item_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(item)));
        Ok(Arc::clone(slot.value()))
    }

    /// Persist one transition and update the in-memory copy.
    fn apply(&self, item: &mut Item, step: Step) -> Result<Transition, PipelineError> {
        let now = Utc::now();
        let from = item.position.clone();
        let mut next = item.clone();

        let to = match step.target {
            Target::Stage(ref stage) => Position::stage(stage),
            Target::Hold => from.clone(),
            Target::TerminalSuccess => Position::TerminalSuccess,
            Target::TerminalFailed => Position::TerminalFailed,
        };

        let entry = HistoryEntry {
            seq: next.ticket_seq(),
            from: from.clone(),
            outcome: step.outcome,
            to: to.clone(),
            at: now,
            actor: step.actor,
            note: step.note,
        };

        next.history.push(entry.clone());
        next.attempts = step.attempts;
        next.failed_stage = step.failed_stage;
        next.updated_at = now;
        next.held = matches!(step.target, Target::Hold);
        if !next.held {
            next.position = to;
            next.stage_entered_at = now;
        }

        let order = if next.held || next.is_terminal() {
            None
        } else {
            DispatchOrder::for_item(&next)
        };
        next.dispatched = order.is_none();

        self.store.record_transition(&next, &entry)?;
        *item = next;

        metrics::TRANSITIONS_TOTAL
            .with_label_values(&[&item.lineage, step.outcome.as_str()])
            .inc();
        debug!(
            item_id = %item.id,
            from = %entry.from,
            to = %entry.to,
            outcome = %entry.outcome,
            attempts = item.attempts,
            "Transition recorded"
        );

        if item.is_terminal() {
            self.in_flight.remove(&item.id);
            let result = match item.position {
                Position::TerminalSuccess => "success",
                _ => "failed",
            };
            metrics::ITEMS_TERMINATED
                .with_label_values(&[&item.lineage, result])
                .inc();
            metrics::ITEMS_IN_FLIGHT.set(self.in_flight.len() as i64);
            info!(item_id = %item.id, position = %item.position, attempts = item.attempts, "Item terminated");
        }

        Ok(Transition {
            item: item.clone(),
            entry,
            order,
        })
    }
}

struct Step {
    target: Target,
    outcome: Outcome,
    attempts: u32,
    failed_stage: Option<String>,
    actor: String,
    note: Option<String>,
}

fn duplicate_reason(item: &Item, report: &StageReport) -> Option<DuplicateReason> {
    let current = match item.current_stage() {
        Some(stage) => stage,
        None => return Some(DuplicateReason::Terminal),
    };
    if current != report.stage {
        return Some(DuplicateReason::StageMismatch {
            current: current.to_string(),
        });
    }
    // Holding appends history without publishing, so the QA worker still
    // holds the ticket issued before the hold entry.
    let held_seq = if item.held {
        item.history.last().map(|entry| entry.seq)
    } else {
        None
    };
    if report.ticket_seq != item.ticket_seq() && Some(report.ticket_seq) != held_seq {
        return Some(DuplicateReason::StaleTicket {
            current_seq: item.ticket_seq(),
        });
    }
    if item.held && report.outcome.is_failure() {
        return Some(DuplicateReason::Held);
    }
    None
}

fn invalid_state(item: &Item, operation: &str) -> PipelineError {
    PipelineError::InvalidState {
        item_id: item.id.clone(),
        position: item.position.to_string(),
        operation: operation.to_string(),
    }
}
