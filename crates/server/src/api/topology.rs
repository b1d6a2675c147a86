//! Topology API handlers: queue catalog, jobs, reachability, reload.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use pulse_core::{
    pipeline::Lineage, EndpointKind, JobDescriptor, QueueDescriptor, ReachabilityEntry,
    ReachabilityReport, TopologyError,
};

use super::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct QueuesResponse {
    pub queues: Vec<QueueDescriptor>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Fan out a canonical job name (`weekly`) to every job key running it.
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<JobDescriptor>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct BrokerReachability {
    pub alias: String,
    pub url: String,
    pub reachable: bool,
}

#[derive(Debug, Serialize)]
pub struct EndpointReachability {
    pub key: String,
    pub kind: EndpointKind,
    pub name: String,
    pub url: String,
    pub reachable: bool,
}

#[derive(Debug, Serialize)]
pub struct ReachabilityResponse {
    pub brokers: Vec<BrokerReachability>,
    pub endpoints: Vec<EndpointReachability>,
    /// Every key currently marked down, brokers and service endpoints.
    pub down: Vec<ReachabilityEntry>,
}

#[derive(Debug, Serialize)]
pub struct KeyReachability {
    pub key: String,
    pub reachable: bool,
    /// Set on updates: whether this report flipped the key's state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

/// A health checker's result for one key.
#[derive(Debug, Deserialize)]
pub struct ReachabilityBody {
    pub reachable: bool,
    pub reason: Option<String>,
    /// Hold a down mark this long instead of the dispatcher default.
    pub recheck_secs: Option<u64>,
    pub actor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PipelineResponse {
    pub max_attempts: u32,
    pub lineages: Vec<Lineage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReloadBody {
    pub actor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub queues: usize,
    pub jobs: usize,
    pub endpoints: usize,
    pub loaded_at: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the queue catalog
pub async fn list_queues(State(state): State<Arc<AppState>>) -> Json<QueuesResponse> {
    let topology = state.orchestrator().topology();
    let queues: Vec<QueueDescriptor> = topology.queues.iter().cloned().collect();
    Json(QueuesResponse {
        total: queues.len(),
        queues,
    })
}

/// Resolve one queue key
pub async fn get_queue(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<QueueDescriptor>, ApiError> {
    let topology = state.orchestrator().topology();
    topology
        .resolve_queue(&key)
        .cloned()
        .map(Json)
        .map_err(not_found)
}

/// List jobs, optionally only those sharing a canonical name
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Json<JobsResponse> {
    let topology = state.orchestrator().topology();
    let jobs: Vec<JobDescriptor> = match params.name {
        Some(ref name) => topology
            .jobs_for_canonical_name(name)
            .into_iter()
            .cloned()
            .collect(),
        None => topology.jobs.iter().cloned().collect(),
    };
    Json(JobsResponse {
        total: jobs.len(),
        jobs,
    })
}

/// Resolve one job key
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<JobDescriptor>, ApiError> {
    let topology = state.orchestrator().topology();
    topology
        .resolve_job(&key)
        .cloned()
        .map(Json)
        .map_err(not_found)
}

/// Broker reachability as seen by the dispatcher
pub async fn get_reachability(State(state): State<Arc<AppState>>) -> Json<ReachabilityResponse> {
    let orchestrator = state.orchestrator();
    let topology = orchestrator.topology();
    let cache = orchestrator.dispatcher().reachability();

    let brokers = topology
        .brokers
        .endpoints()
        .map(|endpoint| BrokerReachability {
            alias: endpoint.alias.clone(),
            url: endpoint.redacted_url(),
            reachable: cache.is_reachable(&endpoint.alias),
        })
        .collect();

    let endpoints = topology
        .endpoints
        .iter()
        .map(|endpoint| EndpointReachability {
            key: endpoint.key.clone(),
            kind: endpoint.kind,
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            reachable: cache.is_reachable(&endpoint.key),
        })
        .collect();

    Json(ReachabilityResponse {
        brokers,
        endpoints,
        down: cache.snapshot(),
    })
}

/// Reachability of one broker alias or endpoint key
pub async fn get_key_reachability(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<KeyReachability>, ApiError> {
    let reachable = state.orchestrator().reachability(&key)?;
    Ok(Json(KeyReachability {
        key,
        reachable,
        changed: None,
    }))
}

/// Record a health check result for one broker alias or endpoint key
pub async fn put_key_reachability(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<ReachabilityBody>,
) -> Result<Json<KeyReachability>, ApiError> {
    let actor = body.actor.unwrap_or_else(|| "health-checker".to_string());
    let report = ReachabilityReport {
        reachable: body.reachable,
        reason: body.reason,
        recheck_after: body.recheck_secs.map(Duration::from_secs),
    };
    let changed = state
        .orchestrator()
        .record_reachability(&key, report, &actor)
        .await?;

    Ok(Json(KeyReachability {
        key,
        reachable: body.reachable,
        changed: Some(changed),
    }))
}

/// The lineages and their transition tables
pub async fn get_pipeline(State(state): State<Arc<AppState>>) -> Json<PipelineResponse> {
    let machine = state.orchestrator().machine();
    Json(PipelineResponse {
        max_attempts: machine.config().max_attempts,
        lineages: machine.definition().lineages().to_vec(),
    })
}

/// Re-read the topology document and swap it in
pub async fn reload(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ReloadBody>>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let actor = body.actor.unwrap_or_else(|| "operator".to_string());

    let topology = state
        .orchestrator()
        .reload_topology(state.topology_path(), &actor)
        .await?;

    Ok(Json(ReloadResponse {
        queues: topology.queues.len(),
        jobs: topology.jobs.len(),
        endpoints: topology.endpoints.len(),
        loaded_at: topology.loaded_at.to_rfc3339(),
    }))
}

fn not_found(err: TopologyError) -> ApiError {
    ApiError::not_found(err.to_string())
}
