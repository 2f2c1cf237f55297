// In-memory backend: a process-local `ResourceStorage` used by tests and by
// single-process deployments that don't need Postgres. No persistence
// across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use dagforge_core::error::{DagforgeError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::ResourceStorage;
use crate::query::{self, Expr};
use crate::transaction::{Operation, Transaction};

#[derive(Debug, Default)]
struct Collections {
    documents: HashMap<String, HashMap<Uuid, Value>>,
    indexes: HashMap<String, Vec<String>>,
}

#[derive(Debug)]
pub struct InMemoryStorage {
    state: RwLock<Collections>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self { state: RwLock::new(Collections::default()) }
    }

    fn document_name(document: &Value) -> Option<&str> {
        document
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .or_else(|| document.get("name").and_then(Value::as_str))
    }
}

#[async_trait]
impl ResourceStorage for InMemoryStorage {
    async fn insert(&self, collection: &str, doc_id: Uuid, document: Value) -> Result<()> {
        let mut state = self.state.write();
        let table = state.documents.entry(collection.to_string()).or_default();
        if table.contains_key(&doc_id) {
            return Err(DagforgeError::conflict(format!("{collection}/{doc_id} already exists")));
        }
        table.insert(doc_id, document);
        Ok(())
    }

    async fn update(&self, collection: &str, doc_id: Uuid, document: Value) -> Result<()> {
        let mut state = self.state.write();
        let table = state.documents.entry(collection.to_string()).or_default();
        if !table.contains_key(&doc_id) {
            return Err(DagforgeError::not_found(format!("{collection}/{doc_id}")));
        }
        table.insert(doc_id, document);
        Ok(())
    }

    async fn delete(&self, collection: &str, doc_id: Uuid) -> Result<()> {
        let mut state = self.state.write();
        let table = state.documents.entry(collection.to_string()).or_default();
        table
            .remove(&doc_id)
            .map(|_| ())
            .ok_or_else(|| DagforgeError::not_found(format!("{collection}/{doc_id}")))
    }

    async fn get(&self, collection: &str, doc_id: Uuid) -> Result<Option<Value>> {
        Ok(self.state.read().documents.get(collection).and_then(|t| t.get(&doc_id)).cloned())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>> {
        Ok(self.state.read().documents.get(collection).map(|t| t.values().cloned().collect()).unwrap_or_default())
    }

    async fn get_by_name(&self, collection: &str, name: &str) -> Result<Option<Value>> {
        Ok(self
            .state
            .read()
            .documents
            .get(collection)
            .and_then(|t| t.values().find(|doc| Self::document_name(doc) == Some(name)))
            .cloned())
    }

    async fn find(&self, collection: &str, expr: &Expr) -> Result<Vec<Value>> {
        Ok(self
            .state
            .read()
            .documents
            .get(collection)
            .map(|t| t.values().filter(|doc| query::matches(doc, expr)).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.state.read().documents.keys().cloned().collect())
    }

    async fn create_collection(&self, collection: &str) -> Result<()> {
        self.state.write().documents.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut state = self.state.write();
        state.documents.remove(collection);
        state.indexes.remove(collection);
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.create_collection(collection).await
    }

    async fn add_field(&self, collection: &str, field: &str, default: Value) -> Result<()> {
        let mut state = self.state.write();
        if let Some(table) = state.documents.get_mut(collection) {
            for doc in table.values_mut() {
                if let Value::Object(map) = doc {
                    map.entry(field.to_string()).or_insert_with(|| default.clone());
                }
            }
        }
        Ok(())
    }

    async fn drop_field(&self, collection: &str, field: &str) -> Result<()> {
        let mut state = self.state.write();
        if let Some(table) = state.documents.get_mut(collection) {
            for doc in table.values_mut() {
                if let Value::Object(map) = doc {
                    map.remove(field);
                }
            }
        }
        Ok(())
    }

    async fn rename_field(&self, collection: &str, from: &str, to: &str) -> Result<()> {
        let mut state = self.state.write();
        if let Some(table) = state.documents.get_mut(collection) {
            for doc in table.values_mut() {
                if let Value::Object(map) = doc {
                    if let Some(value) = map.remove(from) {
                        map.insert(to.to_string(), value);
                    }
                }
            }
        }
        Ok(())
    }

    async fn add_index(&self, collection: &str, field: &str) -> Result<()> {
        let mut state = self.state.write();
        let fields = state.indexes.entry(collection.to_string()).or_default();
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
        Ok(())
    }

    async fn drop_index(&self, collection: &str, field: &str) -> Result<()> {
        if let Some(fields) = self.state.write().indexes.get_mut(collection) {
            fields.retain(|f| f != field);
        }
        Ok(())
    }

    async fn commit(&self, txn: Transaction) -> Result<()> {
        let mut state = self.state.write();
        for op in txn.into_operations() {
            let table = state.documents.entry(op.collection().to_string()).or_default();
            match op {
                Operation::Insert { doc_id, document, .. } => {
                    table.insert(doc_id, document);
                }
                Operation::Update { doc_id, document, .. } => {
                    table.insert(doc_id, document);
                }
                Operation::Delete { doc_id, .. } => {
                    table.remove(&doc_id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let storage = InMemoryStorage::new();
        let id = Uuid::now_v7();
        storage.insert("workflow", id, json!({"metadata": {"name": "wf1"}})).await.unwrap();
        let fetched = storage.get("workflow", id).await.unwrap();
        assert_eq!(fetched.unwrap()["metadata"]["name"], json!("wf1"));
    }

    #[tokio::test]
    async fn insert_twice_with_same_id_conflicts() {
        let storage = InMemoryStorage::new();
        let id = Uuid::now_v7();
        storage.insert("workflow", id, json!({})).await.unwrap();
        let err = storage.insert("workflow", id, json!({})).await.unwrap_err();
        assert!(matches!(err, DagforgeError::Conflict(_)));
    }

    #[tokio::test]
    async fn get_by_name_finds_nested_metadata_name() {
        let storage = InMemoryStorage::new();
        storage.insert("workflow", Uuid::now_v7(), json!({"metadata": {"name": "nightly"}})).await.unwrap();
        let found = storage.get_by_name("workflow", "nightly").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn find_filters_by_expression() {
        let storage = InMemoryStorage::new();
        storage.insert("workflow", Uuid::now_v7(), json!({"metadata": {"name": "a"}})).await.unwrap();
        storage.insert("workflow", Uuid::now_v7(), json!({"metadata": {"name": "b"}})).await.unwrap();
        let results = storage
            .find("workflow", &Expr::Eq("metadata.name".to_string(), json!("a")))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn commit_replays_buffered_operations() {
        let storage = InMemoryStorage::new();
        let id = Uuid::now_v7();
        let mut txn = Transaction::new();
        txn.insert("workflow", id, json!({"metadata": {"name": "wf1"}}));
        storage.commit(txn).await.unwrap();
        assert!(storage.get("workflow", id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn add_field_backfills_existing_documents() {
        let storage = InMemoryStorage::new();
        let id = Uuid::now_v7();
        storage.insert("workflow", id, json!({"metadata": {"name": "wf1"}})).await.unwrap();
        storage.add_field("workflow", "priority", json!(0)).await.unwrap();
        let doc = storage.get("workflow", id).await.unwrap().unwrap();
        assert_eq!(doc["priority"], json!(0));
    }

    #[tokio::test]
    async fn patch_merges_and_protects_immutable_fields() {
        let storage = InMemoryStorage::new();
        let id = Uuid::now_v7();
        storage
            .insert(
                "workflow",
                id,
                json!({"metadata": {"name": "wf1", "updated_at": "2020-01-01T00:00:00Z"}, "spec": {"stages": []}}),
            )
            .await
            .unwrap();

        let merged = storage
            .patch(
                "workflow",
                id,
                json!({"metadata": {"name": "renamed"}, "spec": {"stages": [{"name": "a"}]}}),
            )
            .await
            .unwrap();

        assert_eq!(merged["metadata"]["name"], json!("wf1"));
        assert_eq!(merged["spec"]["stages"], json!([{"name": "a"}]));
        assert_ne!(merged["metadata"]["updated_at"], json!("2020-01-01T00:00:00Z"));

        let stored = storage.get("workflow", id).await.unwrap().unwrap();
        assert_eq!(stored, merged);
    }

    #[tokio::test]
    async fn patch_unknown_document_is_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage.patch("workflow", Uuid::now_v7(), json!({})).await.unwrap_err();
        assert!(matches!(err, DagforgeError::ResourceNotFound(_)));
    }
}
