use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use dagforge_core::DagforgeError;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

const COLLECTION: &str = "run";

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/runs", get(list_runs))
        .route("/v1/runs/:id", get(get_run))
        .with_state(state)
}

async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.storage.get_all(COLLECTION).await?))
}

async fn get_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    state
        .storage
        .get(COLLECTION, id)
        .await?
        .map(Json)
        .ok_or_else(|| DagforgeError::not_found(format!("run `{id}`")).into())
}
