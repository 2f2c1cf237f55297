// Maps the shared error taxonomy onto HTTP status codes. This is the only
// place in the workspace that knows about status codes — everything below
// here works in `DagforgeError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dagforge_core::error::DagforgeError;
use serde_json::json;

pub struct ApiError(pub DagforgeError);

impl From<DagforgeError> for ApiError {
    fn from(err: DagforgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            DagforgeError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            DagforgeError::ResourceNotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            DagforgeError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            DagforgeError::Write(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            DagforgeError::WorkflowExecution(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            DagforgeError::CyclicDependency(stages) => {
                (StatusCode::BAD_REQUEST, format!("cyclic dependency among stages: {stages:?}"))
            }
            DagforgeError::ExecutorUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            DagforgeError::ResourceExhausted(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            DagforgeError::Broker(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            DagforgeError::SchemaMismatch(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            DagforgeError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}
