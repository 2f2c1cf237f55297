// Workflow resource CRUD plus the `/run` trigger endpoint.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use dagforge_core::model::WorkflowResource;
use dagforge_core::{DagforgeError, ResourceMetadata};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

const COLLECTION: &str = "workflow";

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", get(list_workflows).post(create_workflow))
        .route("/v1/workflows/:name", get(get_workflow).put(update_workflow).delete(delete_workflow))
        .route("/v1/workflows/:name/run", post(run_workflow_handler))
        .with_state(state)
}

async fn list_workflows(State(state): State<AppState>) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.storage.get_all(COLLECTION).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub spec: dagforge_core::model::WorkflowSpec,
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<Json<Value>, ApiError> {
    if state.storage.get_by_name(COLLECTION, &request.name).await?.is_some() {
        return Err(DagforgeError::conflict(format!("workflow `{}` already exists", request.name)).into());
    }

    for stage in &request.spec.stages {
        if !state.registry.contains(&stage.target) {
            return Err(DagforgeError::validation(format!("unknown stage target: {}", stage.target)).into());
        }
    }

    let resource = WorkflowResource {
        doc_id: Uuid::now_v7(),
        metadata: ResourceMetadata::new(request.name),
        spec: request.spec,
    };
    let document = serde_json::to_value(&resource).map_err(|e| DagforgeError::Internal(e.into()))?;
    state.storage.insert(COLLECTION, resource.doc_id, document.clone()).await?;
    Ok(Json(document))
}

async fn get_workflow(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .map(Json)
        .ok_or_else(|| DagforgeError::not_found(format!("workflow `{name}`")).into())
}

async fn update_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let document = state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .ok_or_else(|| DagforgeError::not_found(format!("workflow `{name}`")))?;
    let resource: WorkflowResource = serde_json::from_value(document).map_err(|e| DagforgeError::Internal(e.into()))?;
    Ok(Json(state.storage.patch(COLLECTION, resource.doc_id, patch).await?))
}

async fn delete_workflow(State(state): State<AppState>, Path(name): Path<String>) -> Result<(), ApiError> {
    let document = state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .ok_or_else(|| DagforgeError::not_found(format!("workflow `{name}`")))?;
    let resource: WorkflowResource = serde_json::from_value(document).map_err(|e| DagforgeError::Internal(e.into()))?;
    state.storage.delete(COLLECTION, resource.doc_id).await?;
    Ok(())
}

async fn run_workflow_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let document = state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .ok_or_else(|| DagforgeError::not_found(format!("workflow `{name}`")))?;
    let definition: WorkflowResource = serde_json::from_value(document).map_err(|e| DagforgeError::Internal(e.into()))?;

    let input = input.as_object().cloned().unwrap_or_default();
    let sink = Arc::new(dagforge_storage::StorageRunSink::new(state.storage.clone()));
    let publisher = dagforge_eventbus::BusEventPublisher::new(state.bus.clone(), "api");

    let options = dagforge_core::RunWorkflowOptions {
        source: "api".to_string(),
        input,
        ..Default::default()
    };

    let (run, _metrics) =
        dagforge_core::run_workflow(&definition, &state.registry, state.executor.as_ref(), Some(sink.as_ref()), &publisher, options)
            .await?;

    Ok(Json(serde_json::to_value(run).map_err(|e| DagforgeError::Internal(e.into()))?))
}
