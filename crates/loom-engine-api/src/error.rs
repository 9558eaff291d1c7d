//! Maps core errors onto HTTP responses: `SessionNotFound` and
//! `WorkflowNotFound` are 404, validation failures are 400, everything
//! else is an opaque 500 with the message preserved in the body.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use loom_engine_core::CoreError;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match &self.0 {
            CoreError::SessionNotFound { .. } => "session_not_found",
            CoreError::WorkflowNotFound { .. } => "workflow_not_found",
            CoreError::Validation(_) => "validation_error",
            CoreError::Store { .. } => "store_error",
            CoreError::Provider(_) => "provider_error",
            CoreError::RecordingNotFound { .. } => "recording_not_found",
            CoreError::Handler { .. } => "handler_error",
            CoreError::InvalidDefinition { .. } => "invalid_definition",
            CoreError::Serialization { .. } => "serialization_error",
            CoreError::InvalidSessionState { .. } => "invalid_session_state",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            CoreError::SessionNotFound { .. } | CoreError::WorkflowNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": self.0.to_string(),
        }))
    }
}
