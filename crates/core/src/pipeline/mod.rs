//! Pipeline definition and the per-item state machine.

mod definition;
mod error;
mod machine;

pub use definition::{Edge, Lineage, PipelineDefinition, ResubmitTarget, Target};
pub use error::PipelineError;
pub use machine::{
    DispatchOrder, DuplicateReason, PipelineMachine, PublishClaim, ReportResult, StageReport,
    SubmitRequest, Transition,
};
