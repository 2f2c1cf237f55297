// Storage-backend contract. Everything above this trait (transactions,
// migrations, the run sink) is backend-agnostic; `memory.rs` and
// `postgres.rs` are the only two places that know how a document is
// actually persisted.

use async_trait::async_trait;
use dagforge_core::error::{DagforgeError, Result};
use serde_json::Value;
use uuid::Uuid;

use crate::immutable::merge_patch;
use crate::query::Expr;
use crate::transaction::Transaction;

/// A schemaless document store keyed by `(collection, doc_id)`. Documents
/// are opaque `serde_json::Value` objects; every resource kind
/// (`workflow`, `config`, `trigger_rule`, runs) is a collection name.
#[async_trait]
pub trait ResourceStorage: Send + Sync + std::fmt::Debug {
    async fn insert(&self, collection: &str, doc_id: Uuid, document: Value) -> Result<()>;
    async fn update(&self, collection: &str, doc_id: Uuid, document: Value) -> Result<()>;
    async fn delete(&self, collection: &str, doc_id: Uuid) -> Result<()>;
    async fn get(&self, collection: &str, doc_id: Uuid) -> Result<Option<Value>>;
    async fn get_all(&self, collection: &str) -> Result<Vec<Value>>;

    /// Convenience lookup by the document's `metadata.name` (or bare `name`
    /// for collections without a `metadata` wrapper, e.g. `_migrate`).
    async fn get_by_name(&self, collection: &str, name: &str) -> Result<Option<Value>>;

    async fn find(&self, collection: &str, expr: &Expr) -> Result<Vec<Value>>;
    async fn find_one(&self, collection: &str, expr: &Expr) -> Result<Option<Value>> {
        Ok(self.find(collection, expr).await?.into_iter().next())
    }

    /// Fetches the existing document, applies `patch` through
    /// `immutable::merge_patch` (silently keeping the collection's immutable
    /// fields at their existing value), stamps `metadata.updated_at`, and
    /// writes the merged document back. Every PUT-style handler goes through
    /// this rather than calling `update` with a caller-assembled document, so
    /// immutability is enforced at the one place updates actually happen.
    async fn patch(&self, collection: &str, doc_id: Uuid, patch: Value) -> Result<Value> {
        let existing = self
            .get(collection, doc_id)
            .await?
            .ok_or_else(|| DagforgeError::not_found(format!("{collection} `{doc_id}`")))?;

        let mut merged = merge_patch(collection, &existing, &patch);
        if let Some(updated_at) = merged.pointer_mut("/metadata/updated_at") {
            *updated_at = Value::String(chrono::Utc::now().to_rfc3339());
        }

        self.update(collection, doc_id, merged.clone()).await?;
        Ok(merged)
    }

    async fn list_collections(&self) -> Result<Vec<String>>;
    async fn create_collection(&self, collection: &str) -> Result<()>;
    async fn drop_collection(&self, collection: &str) -> Result<()>;
    /// Creates the collection if it doesn't already exist; a no-op
    /// otherwise. Used by migrations, which must be safely re-runnable.
    async fn ensure_collection(&self, collection: &str) -> Result<()>;

    /// Backfills `default` into every document in `collection` missing
    /// `field`. A no-op backend (like an untyped in-memory store) may treat
    /// this as a pure bookkeeping operation with no document rewrite.
    async fn add_field(&self, collection: &str, field: &str, default: Value) -> Result<()>;
    async fn drop_field(&self, collection: &str, field: &str) -> Result<()>;
    async fn rename_field(&self, collection: &str, from: &str, to: &str) -> Result<()>;

    async fn add_index(&self, collection: &str, field: &str) -> Result<()>;
    async fn drop_index(&self, collection: &str, field: &str) -> Result<()>;

    /// Replays every staged operation atomically against the backend. The
    /// transaction's own buffering and savepoints govern what operations
    /// end up in `txn` by the time it gets here; the backend's own native
    /// transaction (Postgres) or write lock (in-memory) governs atomicity
    /// of the replay itself.
    async fn commit(&self, txn: Transaction) -> Result<()>;
}
