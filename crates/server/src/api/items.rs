//! Item API handlers: submission, worker reports, operator actions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use pulse_core::{
    DuplicateReason, HistoryEntry, Item, ItemFilter, ItemKind, ItemStatus, ReportResult,
    StageReport, SubmitRequest,
};

use super::error::ApiError;
use crate::state::AppState;

/// Maximum allowed limit for item queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for item queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting an item
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    #[serde(flatten)]
    pub request: SubmitRequest,
    /// Who submitted the item (defaults to "operator")
    pub actor: Option<String>,
}

/// Query parameters for listing items
#[derive(Debug, Deserialize)]
pub struct ListItemsParams {
    /// `in_flight`, `succeeded` or `failed`
    pub status: Option<String>,
    pub lineage: Option<String>,
    /// Current stage id
    pub stage: Option<String>,
    pub kind: Option<String>,
    pub job: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Request body for operator actions
#[derive(Debug, Default, Deserialize)]
pub struct ActionBody {
    pub actor: Option<String>,
    /// Note for a resubmit, reason for a cancel
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListItemsResponse {
    pub items: Vec<Item>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub item_id: String,
    pub history: Vec<HistoryEntry>,
}

/// Result of a worker report. Duplicates are not errors.
#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<DuplicateReason>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new item at an entry stage
pub async fn submit_item(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitBody>,
) -> Result<(StatusCode, Json<Item>), ApiError> {
    let actor = actor_or_default(body.actor);
    let item = state.orchestrator().submit(body.request, &actor).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// List items
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListItemsParams>,
) -> Result<Json<ListItemsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = ItemFilter::new().with_limit(limit).with_offset(offset);
    if let Some(ref status) = params.status {
        let status: ItemStatus = status.parse().map_err(ApiError::bad_request)?;
        filter = filter.with_status(status);
    }
    if let Some(ref kind) = params.kind {
        let kind: ItemKind = kind.parse().map_err(ApiError::bad_request)?;
        filter = filter.with_kind(kind);
    }
    if let Some(lineage) = params.lineage {
        filter = filter.with_lineage(lineage);
    }
    if let Some(stage) = params.stage {
        filter = filter.with_stage(stage);
    }
    if let Some(job) = params.job {
        filter = filter.with_job(job);
    }

    let (items, total) = state.orchestrator().list(&filter)?;
    Ok(Json(ListItemsResponse {
        items,
        total,
        limit,
        offset,
    }))
}

/// Get an item by ID
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Item>, ApiError> {
    Ok(Json(state.orchestrator().get(&id).await?))
}

/// Get an item's transition history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state.orchestrator().history(&id).await?;
    Ok(Json(HistoryResponse {
        item_id: id,
        history,
    }))
}

/// Send an item back from its error stage
pub async fn resubmit_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ActionBody>>,
) -> Result<Json<Item>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let actor = actor_or_default(body.actor);
    let transition = state
        .orchestrator()
        .resubmit(&id, &actor, body.note)
        .await?;
    Ok(Json(transition.item))
}

/// Withdraw an item
pub async fn cancel_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ActionBody>>,
) -> Result<Json<Item>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let actor = actor_or_default(body.actor);
    let transition = state.orchestrator().cancel(&id, &actor, body.note).await?;
    Ok(Json(transition.item))
}

/// Apply a worker's stage report
pub async fn submit_report(
    State(state): State<Arc<AppState>>,
    Json(report): Json<StageReport>,
) -> Result<Json<ReportResponse>, ApiError> {
    let response = match state.orchestrator().report(report).await? {
        ReportResult::Applied(transition) => ReportResponse {
            applied: true,
            item: Some(transition.item),
            duplicate: None,
        },
        ReportResult::Duplicate { reason, .. } => ReportResponse {
            applied: false,
            item: None,
            duplicate: Some(reason),
        },
    };
    Ok(Json(response))
}

fn actor_or_default(actor: Option<String>) -> String {
    actor
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| "operator".to_string())
}
