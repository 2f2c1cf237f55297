// Value handlers: persist/load a typed value into an artifact under a
// chosen file format, stamping a `value_type` metadata field so a later
// `load` can assert it's reading back what it wrote.

use dagforge_core::error::{DagforgeError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use crate::artifact::Artifact;

const VALUE_TYPE_META_KEY: &str = "value_type";

fn expect_value_type(stored: Option<JsonValue>, expected: &str) -> Result<()> {
    match stored {
        Some(JsonValue::String(s)) if s == expected => Ok(()),
        Some(other) => Err(DagforgeError::validation(format!(
            "artifact value_type mismatch: expected `{expected}`, found `{other}`"
        ))),
        None => Err(DagforgeError::validation(format!(
            "artifact has no value_type metadata; expected `{expected}`"
        ))),
    }
}

/// Serializes `value` as pretty JSON into `{name}.json` and records
/// `value_type = "json"` in the artifact's metadata.
pub async fn json_to_artifact<T: Serialize>(artifact: &Artifact, name: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| DagforgeError::Internal(e.into()))?;
    artifact.new_file(&format!("{name}.json"), Some(&bytes), true).await?;
    artifact.set_meta(VALUE_TYPE_META_KEY, JsonValue::String("json".to_string())).await
}

pub async fn json_from_artifact<T: DeserializeOwned>(artifact: &Artifact, name: &str) -> Result<T> {
    expect_value_type(artifact.get_meta(VALUE_TYPE_META_KEY).await?, "json")?;
    let file = artifact.get_file(&format!("{name}.json"), false).await?;
    let bytes = file.read().await?;
    serde_json::from_slice(&bytes).map_err(|e| DagforgeError::Internal(e.into()))
}

/// Serializes `value` with `bincode` into `{name}.bin` and records
/// `value_type = "bincode"`. Used for values that aren't cleanly
/// JSON-representable (raw tensors, opaque blobs).
pub async fn bincode_to_artifact<T: Serialize>(artifact: &Artifact, name: &str, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value).map_err(|e| DagforgeError::Internal(e.into()))?;
    artifact.new_file(&format!("{name}.bin"), Some(&bytes), true).await?;
    artifact.set_meta(VALUE_TYPE_META_KEY, JsonValue::String("bincode".to_string())).await
}

pub async fn bincode_from_artifact<T: DeserializeOwned>(artifact: &Artifact, name: &str) -> Result<T> {
    expect_value_type(artifact.get_meta(VALUE_TYPE_META_KEY).await?, "bincode")?;
    let file = artifact.get_file(&format!("{name}.bin"), false).await?;
    let bytes = file.read().await?;
    bincode::deserialize(&bytes).map_err(|e| DagforgeError::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::backend::{FileBackend, LocalDiskBackend};
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn FileBackend> = Arc::new(LocalDiskBackend::new(dir.path()));
        (dir, ArtifactStore::new(backend))
    }

    #[tokio::test]
    async fn json_handler_round_trips_a_value() {
        let (_dir, store) = store();
        let artifact = store.get_or_create("default", "point").await.unwrap();
        json_to_artifact(&artifact, "value", &Point { x: 1, y: 2 }).await.unwrap();
        let loaded: Point = json_from_artifact(&artifact, "value").await.unwrap();
        assert_eq!(loaded, Point { x: 1, y: 2 });
    }

    #[tokio::test]
    async fn loading_with_the_wrong_handler_is_a_validation_error() {
        let (_dir, store) = store();
        let artifact = store.get_or_create("default", "point").await.unwrap();
        json_to_artifact(&artifact, "value", &Point { x: 1, y: 2 }).await.unwrap();
        let err = bincode_from_artifact::<Point>(&artifact, "value").await.unwrap_err();
        assert!(matches!(err, DagforgeError::Validation(_)));
    }

    #[tokio::test]
    async fn bincode_handler_round_trips_a_value() {
        let (_dir, store) = store();
        let artifact = store.get_or_create("default", "point").await.unwrap();
        bincode_to_artifact(&artifact, "value", &Point { x: 3, y: 4 }).await.unwrap();
        let loaded: Point = bincode_from_artifact(&artifact, "value").await.unwrap();
        assert_eq!(loaded, Point { x: 3, y: 4 });
    }
}
