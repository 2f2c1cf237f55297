//! Resource store: a schemaless document model shared by workflows, configs,
//! trigger rules, and runs, with a query expression tree, buffered
//! transactions with nested savepoints, immutable-field merge-patch
//! semantics, revision-chain migrations, and Postgres/in-memory backends
//! behind one `ResourceStorage` trait.

pub mod backend;
pub mod immutable;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod memory;
pub mod migrations;
pub mod query;
pub mod run_sink;
pub mod transaction;

pub use backend::ResourceStorage;
pub use memory::InMemoryStorage;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStorage;
pub use run_sink::StorageRunSink;
pub use transaction::Transaction;

use std::sync::Arc;

use dagforge_core::error::{DagforgeError, Result};

/// Builds a backend from a `storage.backend` configuration name
/// (`"memory"` or `"postgres"`), mirroring the factory pattern used for the
/// broker and executor.
pub async fn storage_from_config(backend: &str, database_url: Option<&str>) -> Result<Arc<dyn ResourceStorage>> {
    match backend {
        "memory" => Ok(Arc::new(InMemoryStorage::new())),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = database_url.ok_or_else(|| DagforgeError::validation("postgres backend requires a database url"))?;
            Ok(Arc::new(PostgresStorage::connect(url).await?))
        }
        other => Err(DagforgeError::validation(format!("unknown storage backend: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_is_always_available() {
        assert!(storage_from_config("memory", None).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_backend_name_is_a_validation_error() {
        let err = storage_from_config("sqlite", None).await.unwrap_err();
        assert!(matches!(err, DagforgeError::Validation(_)));
    }
}
