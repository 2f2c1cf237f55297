// Postgres backend: one table per collection, each row a JSONB document
// keyed by its `doc_id`. Query expressions compile down to parameterized
// `WHERE` clauses via `query::PostgresCompiler` instead of being evaluated
// in process.

use async_trait::async_trait;
use dagforge_core::error::{DagforgeError, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::query::Visitor;

use crate::backend::ResourceStorage;
use crate::query::{Expr, PostgresCompiler};
use crate::transaction::{Operation, Transaction};

#[derive(Debug)]
pub struct PostgresStorage {
    pool: PgPool,
}

fn table_name(collection: &str) -> String {
    format!("documents_{collection}")
}

/// Reasonable default: any ASCII alphanumeric plus `_`. Collection names
/// come from code (resource kinds), never directly from a request body, but
/// this still guards against building an invalid/unsafe table identifier.
fn validate_collection_name(collection: &str) -> Result<()> {
    if collection.is_empty() || !collection.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DagforgeError::validation(format!("invalid collection name: {collection}")));
    }
    Ok(())
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn rows_to_documents(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Value>> {
        rows.into_iter()
            .map(|row| row.try_get::<Value, _>("data").map_err(|e| DagforgeError::Internal(e.into())))
            .collect()
    }
}

#[async_trait]
impl ResourceStorage for PostgresStorage {
    async fn insert(&self, collection: &str, doc_id: Uuid, document: Value) -> Result<()> {
        validate_collection_name(collection)?;
        let sql = format!("INSERT INTO {} (doc_id, data) VALUES ($1, $2)", table_name(collection));
        sqlx::query(&sql)
            .bind(doc_id)
            .bind(&document)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    DagforgeError::conflict(format!("{collection}/{doc_id} already exists"))
                }
                _ => DagforgeError::Internal(e.into()),
            })?;
        Ok(())
    }

    async fn update(&self, collection: &str, doc_id: Uuid, document: Value) -> Result<()> {
        validate_collection_name(collection)?;
        let sql = format!("UPDATE {} SET data = $2 WHERE doc_id = $1", table_name(collection));
        let result = sqlx::query(&sql)
            .bind(doc_id)
            .bind(&document)
            .execute(&self.pool)
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(DagforgeError::not_found(format!("{collection}/{doc_id}")));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, doc_id: Uuid) -> Result<()> {
        validate_collection_name(collection)?;
        let sql = format!("DELETE FROM {} WHERE doc_id = $1", table_name(collection));
        let result = sqlx::query(&sql)
            .bind(doc_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(DagforgeError::not_found(format!("{collection}/{doc_id}")));
        }
        Ok(())
    }

    async fn get(&self, collection: &str, doc_id: Uuid) -> Result<Option<Value>> {
        validate_collection_name(collection)?;
        let sql = format!("SELECT data FROM {} WHERE doc_id = $1", table_name(collection));
        let row = sqlx::query(&sql)
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))?;
        row.map(|r| r.try_get::<Value, _>("data").map_err(|e| DagforgeError::Internal(e.into()))).transpose()
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>> {
        validate_collection_name(collection)?;
        let sql = format!("SELECT data FROM {}", table_name(collection));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(|e| DagforgeError::Internal(e.into()))?;
        Self::rows_to_documents(rows)
    }

    async fn get_by_name(&self, collection: &str, name: &str) -> Result<Option<Value>> {
        validate_collection_name(collection)?;
        let sql = format!(
            "SELECT data FROM {} WHERE data #>> '{{metadata,name}}' = $1 OR data #>> '{{name}}' = $1",
            table_name(collection)
        );
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))?;
        row.map(|r| r.try_get::<Value, _>("data").map_err(|e| DagforgeError::Internal(e.into()))).transpose()
    }

    async fn find(&self, collection: &str, expr: &Expr) -> Result<Vec<Value>> {
        validate_collection_name(collection)?;
        let mut compiler = PostgresCompiler::new("data");
        let where_clause = compiler.visit(expr);
        let sql = format!("SELECT data FROM {} WHERE {}", table_name(collection), where_clause);

        let mut query = sqlx::query(&sql);
        for param in &compiler.params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(|e| DagforgeError::Internal(e.into()))?;
        Self::rows_to_documents(rows)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT table_name FROM information_schema.tables WHERE table_name LIKE 'documents_%'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.try_get::<String, _>("table_name").ok())
            .map(|name| name.trim_start_matches("documents_").to_string())
            .collect())
    }

    async fn create_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (doc_id UUID PRIMARY KEY, data JSONB NOT NULL)",
            table_name(collection)
        );
        sqlx::query(&sql).execute(&self.pool).await.map_err(|e| DagforgeError::Internal(e.into()))?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let sql = format!("DROP TABLE IF EXISTS {}", table_name(collection));
        sqlx::query(&sql).execute(&self.pool).await.map_err(|e| DagforgeError::Internal(e.into()))?;
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.create_collection(collection).await
    }

    async fn add_field(&self, collection: &str, field: &str, default: Value) -> Result<()> {
        validate_collection_name(collection)?;
        let sql = format!(
            "UPDATE {} SET data = jsonb_set(data, '{{{field}}}', $1) WHERE NOT (data ? $2)",
            table_name(collection)
        );
        sqlx::query(&sql)
            .bind(&default)
            .bind(field)
            .execute(&self.pool)
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))?;
        Ok(())
    }

    async fn drop_field(&self, collection: &str, field: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let sql = format!("UPDATE {} SET data = data - $1", table_name(collection));
        sqlx::query(&sql).bind(field).execute(&self.pool).await.map_err(|e| DagforgeError::Internal(e.into()))?;
        Ok(())
    }

    async fn rename_field(&self, collection: &str, from: &str, to: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let sql = format!(
            "UPDATE {} SET data = (data - $1) || jsonb_build_object($2, data -> $1) WHERE data ? $1",
            table_name(collection)
        );
        sqlx::query(&sql)
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))?;
        Ok(())
    }

    async fn add_index(&self, collection: &str, field: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let index_name = format!("idx_{}_{}", table_name(collection), field.replace('.', "_"));
        let path: Vec<String> = field.split('.').map(|s| format!("\"{s}\"")).collect();
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {index_name} ON {} ((data #>> '{{{}}}'))",
            table_name(collection),
            path.join(",")
        );
        sqlx::query(&sql).execute(&self.pool).await.map_err(|e| DagforgeError::Internal(e.into()))?;
        Ok(())
    }

    async fn drop_index(&self, collection: &str, field: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let index_name = format!("idx_{}_{}", table_name(collection), field.replace('.', "_"));
        let sql = format!("DROP INDEX IF EXISTS {index_name}");
        sqlx::query(&sql).execute(&self.pool).await.map_err(|e| DagforgeError::Internal(e.into()))?;
        Ok(())
    }

    async fn commit(&self, txn: Transaction) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| DagforgeError::Internal(e.into()))?;
        for op in txn.into_operations() {
            validate_collection_name(op.collection())?;
            match op {
                Operation::Insert { collection, doc_id, document } => {
                    let sql = format!("INSERT INTO {} (doc_id, data) VALUES ($1, $2)", table_name(&collection));
                    sqlx::query(&sql).bind(doc_id).bind(&document).execute(&mut *tx).await.map_err(|e| DagforgeError::Internal(e.into()))?;
                }
                Operation::Update { collection, doc_id, document } => {
                    let sql = format!("UPDATE {} SET data = $2 WHERE doc_id = $1", table_name(&collection));
                    sqlx::query(&sql).bind(doc_id).bind(&document).execute(&mut *tx).await.map_err(|e| DagforgeError::Internal(e.into()))?;
                }
                Operation::Delete { collection, doc_id } => {
                    let sql = format!("DELETE FROM {} WHERE doc_id = $1", table_name(&collection));
                    sqlx::query(&sql).bind(doc_id).execute(&mut *tx).await.map_err(|e| DagforgeError::Internal(e.into()))?;
                }
            }
        }
        tx.commit().await.map_err(|e| DagforgeError::Internal(e.into()))
    }
}
