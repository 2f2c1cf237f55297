// Trigger rule CRUD, plus the `TriggerRuleStore` adapter the trigger engine
// reads from — both live here since this crate is the only place that pairs
// `dagforge-storage` with `dagforge-triggers`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dagforge_core::error::Result as CoreResult;
use dagforge_core::model::{ResourceMetadata, TriggerRule, TriggerRuleResource};
use dagforge_core::DagforgeError;
use dagforge_storage::ResourceStorage;
use dagforge_triggers::TriggerRuleStore;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

const COLLECTION: &str = "trigger_rule";

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/trigger_rules", get(list_trigger_rules).post(create_trigger_rule))
        .route("/v1/trigger_rules/:name", get(get_trigger_rule).put(update_trigger_rule).delete(delete_trigger_rule))
        .with_state(state)
}

async fn list_trigger_rules(State(state): State<AppState>) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.storage.get_all(COLLECTION).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateTriggerRuleRequest {
    pub name: String,
    #[serde(flatten)]
    pub rule: TriggerRule,
    pub action: dagforge_core::model::TriggerAction,
}

async fn create_trigger_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateTriggerRuleRequest>,
) -> Result<Json<Value>, ApiError> {
    if state.storage.get_by_name(COLLECTION, &request.name).await?.is_some() {
        return Err(DagforgeError::conflict(format!("trigger rule `{}` already exists", request.name)).into());
    }

    let resource = TriggerRuleResource {
        doc_id: Uuid::now_v7(),
        metadata: ResourceMetadata::new(request.name),
        spec: dagforge_core::model::TriggerRuleSpec { rule: request.rule, action: request.action },
    };
    let document = serde_json::to_value(&resource).map_err(|e| DagforgeError::Internal(e.into()))?;
    state.storage.insert(COLLECTION, resource.doc_id, document.clone()).await?;
    Ok(Json(document))
}

async fn get_trigger_rule(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .map(Json)
        .ok_or_else(|| DagforgeError::not_found(format!("trigger rule `{name}`")).into())
}

async fn update_trigger_rule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let document = state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .ok_or_else(|| DagforgeError::not_found(format!("trigger rule `{name}`")))?;
    let resource: TriggerRuleResource = serde_json::from_value(document).map_err(|e| DagforgeError::Internal(e.into()))?;
    Ok(Json(state.storage.patch(COLLECTION, resource.doc_id, patch).await?))
}

async fn delete_trigger_rule(State(state): State<AppState>, Path(name): Path<String>) -> Result<(), ApiError> {
    let document = state
        .storage
        .get_by_name(COLLECTION, &name)
        .await?
        .ok_or_else(|| DagforgeError::not_found(format!("trigger rule `{name}`")))?;
    let resource: TriggerRuleResource = serde_json::from_value(document).map_err(|e| DagforgeError::Internal(e.into()))?;
    state.storage.delete(COLLECTION, resource.doc_id).await?;
    Ok(())
}

/// Adapts any `ResourceStorage` into the `TriggerRuleStore` the trigger
/// engine polls against.
pub struct StorageTriggerRuleStore {
    storage: Arc<dyn ResourceStorage>,
}

impl StorageTriggerRuleStore {
    pub fn new(storage: Arc<dyn ResourceStorage>) -> Self {
        Self { storage }
    }

    async fn all_rules(&self) -> CoreResult<Vec<TriggerRuleResource>> {
        let documents = self.storage.get_all(COLLECTION).await?;
        documents
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(|e| DagforgeError::Internal(e.into())))
            .collect()
    }
}

#[async_trait]
impl TriggerRuleStore for StorageTriggerRuleStore {
    async fn list_condition_triggers(&self) -> CoreResult<Vec<TriggerRuleResource>> {
        Ok(self.all_rules().await?.into_iter().filter(|r| matches!(r.spec.rule, TriggerRule::Condition(_))).collect())
    }

    async fn list_schedule_triggers(&self) -> CoreResult<Vec<TriggerRuleResource>> {
        Ok(self.all_rules().await?.into_iter().filter(|r| matches!(r.spec.rule, TriggerRule::Schedule(_))).collect())
    }

    async fn mark_ran(&self, uid: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        let documents = self.storage.get_all(COLLECTION).await?;
        for doc in documents {
            let mut resource: TriggerRuleResource =
                serde_json::from_value(doc).map_err(|e| DagforgeError::Internal(e.into()))?;
            if resource.metadata.uid == uid {
                resource.metadata.annotations.insert("last_run".to_string(), at.to_rfc3339());
                let updated = serde_json::to_value(&resource).map_err(|e| DagforgeError::Internal(e.into()))?;
                self.storage.update(COLLECTION, resource.doc_id, updated).await?;
                return Ok(());
            }
        }
        Ok(())
    }
}
