use thiserror::Error;

use crate::item::{ItemStoreError, Outcome};

/// Errors raised by the pipeline state machine.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("stage {0} is not part of any lineage")]
    UnknownStage(String),

    #[error("stage {0} is not an entry stage")]
    NotAnEntryStage(String),

    #[error("no {outcome} transition from stage {stage}")]
    NoTransition { stage: String, outcome: Outcome },

    #[error("cannot {operation} item {item_id}: item is at {position}")]
    InvalidState {
        item_id: String,
        position: String,
        operation: String,
    },

    #[error("item {item_id} has used {attempts} of {max_attempts} attempts")]
    AttemptsExhausted {
        item_id: String,
        attempts: u32,
        max_attempts: u32,
    },

    #[error("invalid pipeline definition: {0}")]
    Definition(String),

    #[error("item store error: {0}")]
    Store(#[from] ItemStoreError),
}
