// Config resource CRUD; configs are joined into a workflow's run input by
// `config_join` inside the runtime, not by this module.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use dagforge_core::model::ConfigResource;
use dagforge_core::{DagforgeError, ResourceMetadata};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

const COLLECTION: &str = "config";

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/configs", get(list_configs).post(create_config))
        .route("/v1/configs/:name", get(get_config).put(update_config).delete(delete_config))
        .with_state(state)
}

async fn list_configs(State(state): State<AppState>) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.storage.get_all(COLLECTION).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateConfigRequest {
    pub name: String,
    pub spec: dagforge_core::model::ConfigSpec,
}

async fn create_config(
    State(state): State<AppState>,
    Json(request): Json<CreateConfigRequest>,
) -> Result<Json<Value>, ApiError> {
    if state.storage.get_by_name(COLLECTION, &request.name).await?.is_some() {
        return Err(DagforgeError::conflict(format!("config `{}` already exists", request.name)).into());
    }

    let resource = ConfigResource {
        doc_id: Uuid::now_v7(),
        metadata: ResourceMetadata::new(request.name),
        spec: request.spec,
    };
    let document = serde_json::to_value(&resource).map_err(|e| DagforgeError::Internal(e.into()))?;
    state.storage.insert(COLLECTION, resource.doc_id, document.clone()).await?;
    Ok(Json(document))
}

async fn get_config(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .map(Json)
        .ok_or_else(|| DagforgeError::not_found(format!("config `{name}`")).into())
}

async fn update_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let document = state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .ok_or_else(|| DagforgeError::not_found(format!("config `{name}`")))?;
    let resource: ConfigResource = serde_json::from_value(document).map_err(|e| DagforgeError::Internal(e.into()))?;
    Ok(Json(state.storage.patch(COLLECTION, resource.doc_id, patch).await?))
}

async fn delete_config(State(state): State<AppState>, Path(name): Path<String>) -> Result<(), ApiError> {
    let document = state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .ok_or_else(|| DagforgeError::not_found(format!("config `{name}`")))?;
    let resource: ConfigResource = serde_json::from_value(document).map_err(|e| DagforgeError::Internal(e.into()))?;
    state.storage.delete(COLLECTION, resource.doc_id).await?;
    Ok(())
}
