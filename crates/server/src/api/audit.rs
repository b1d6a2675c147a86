//! Audit API handlers: filtered queries and per-item trails.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use pulse_core::{AuditFilter, AuditRecord, AuditStore, Severity};

use super::error::ApiError;
use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;
const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub item_id: Option<String>,
    pub lineage: Option<String>,
    /// Stage the event happened at (the source stage for transitions).
    pub stage: Option<String>,
    pub event_type: Option<String>,
    pub actor: Option<String>,
    /// `info`, `warning` or `alert`: that severity and above.
    pub severity: Option<Severity>,
    /// Shorthand for `severity=alert`.
    #[serde(default)]
    pub alerts: bool,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    fn to_filter(&self) -> AuditFilter {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        let min_severity = if self.alerts {
            Some(Severity::Alert)
        } else {
            self.severity
        };

        AuditFilter {
            item_id: self.item_id.clone(),
            lineage: self.lineage.clone(),
            stage: self.stage.clone(),
            event_type: self.event_type.clone(),
            actor: self.actor.clone(),
            min_severity,
            from: self.from,
            to: self.to,
            limit,
            offset,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    /// Newest first.
    pub events: Vec<AuditRecord>,
    /// All matching events, ignoring limit and offset.
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ItemTrailResponse {
    pub item_id: String,
    /// Oldest first, grouped by ticket seq.
    pub events: Vec<AuditRecord>,
}

/// Query audit events
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    let filter = params.to_filter();
    let events = state.audit_store().query(&filter)?;
    let total = state.audit_store().count(&filter)?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

/// Everything recorded about one item, in the order it happened
pub async fn item_trail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemTrailResponse>, ApiError> {
    // 404 for unknown items rather than an empty trail.
    state.orchestrator().get(&id).await?;
    let events = state.audit_store().item_trail(&id)?;
    Ok(Json(ItemTrailResponse { item_id: id, events }))
}
