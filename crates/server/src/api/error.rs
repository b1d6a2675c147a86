//! Mapping from core errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use pulse_core::{
    AuditError, ConfigError, DispatchError, ItemStoreError, OrchestratorError, PipelineError,
};

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error with the status it should be served under.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn pipeline_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::ItemNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::UnknownStage(_) | PipelineError::NotAnEntryStage(_) => {
            StatusCode::BAD_REQUEST
        }
        PipelineError::NoTransition { .. }
        | PipelineError::InvalidState { .. }
        | PipelineError::AttemptsExhausted { .. } => StatusCode::CONFLICT,
        PipelineError::Store(e) => store_status(e),
        PipelineError::Definition(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_status(err: &ItemStoreError) -> StatusCode {
    match err {
        ItemStoreError::NotFound(_) => StatusCode::NOT_FOUND,
        ItemStoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        ItemStoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::Pipeline(e) => pipeline_status(e),
            OrchestratorError::Topology(_) => StatusCode::NOT_FOUND,
            OrchestratorError::Store(e) => store_status(e),
            OrchestratorError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::Dispatch { source, .. } => match source {
                DispatchError::BrokerUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DispatchError::Routing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        Self::new(status, err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query audit events: {}", err),
        )
    }
}
