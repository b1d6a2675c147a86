//! Pipeline orchestrator: the operator and worker entry point.
//!
//! Every operation records its transition through the state machine first
//! and publishes afterwards. Two background loops keep items moving:
//! - **Timeout sweeper**: missed stage deadlines become Timeout reports
//! - **Redispatch loop**: tickets that never reached a broker are retried

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::{is_dispatch_pending, PipelineOrchestrator};
pub use types::{OrchestratorError, OrchestratorStatus, ReachabilityReport};
