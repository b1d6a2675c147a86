//! Types for the pipeline orchestrator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::item::ItemStoreError;
use crate::pipeline::PipelineError;
use crate::topology::TopologyError;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("item store error: {0}")]
    Store(#[from] ItemStoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transition was recorded but its work ticket was not published.
    #[error("item {item_id} recorded but not dispatched: {source}")]
    Dispatch {
        item_id: String,
        #[source]
        source: DispatchError,
    },
}

/// A health checker's verdict on a broker alias or service endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReachabilityReport {
    pub reachable: bool,
    pub reason: Option<String>,
    /// How long a down mark holds. Defaults to the dispatcher's recheck
    /// interval.
    pub recheck_after: Option<std::time::Duration>,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStatus {
    /// Whether the background loops are running.
    pub running: bool,
    /// Items not in a terminal position.
    pub in_flight: usize,
    /// In-flight items whose current ticket is not confirmed published.
    pub undispatched: usize,
    /// Items parked for manual QA.
    pub held: usize,
    /// In-flight items per stage.
    pub by_stage: BTreeMap<String, usize>,
    /// Broker aliases currently marked unreachable.
    pub brokers_down: Vec<String>,
    pub topology_loaded_at: Option<DateTime<Utc>>,
}
