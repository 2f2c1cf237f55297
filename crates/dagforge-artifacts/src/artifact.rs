// Namespaced artifact trees: `artifacts/{namespace}/{name}/...` on whatever
// `FileBackend` the store was built with, plus a reserved `.artifact.json`
// sidecar file holding arbitrary metadata key/value pairs.

use std::sync::Arc;

use dagforge_core::error::{DagforgeError, Result};
use serde_json::{Map, Value};

use crate::backend::{join, FileBackend};
use crate::validate::{validate_artifact_name, validate_filename};

const METADATA_FILENAME: &str = ".artifact.json";

/// A single file living inside an artifact's directory.
pub struct ArtifactFile {
    backend: Arc<dyn FileBackend>,
    path: String,
    filename: String,
}

impl std::fmt::Debug for ArtifactFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactFile")
            .field("path", &self.path)
            .field("filename", &self.filename)
            .finish()
    }
}

impl ArtifactFile {
    fn new(backend: Arc<dyn FileBackend>, artifact_path: &str, filename: &str) -> Result<Self> {
        let filename = validate_filename(filename)?.to_string();
        let path = join(&[artifact_path, &filename]);
        Ok(Self { backend, path, filename })
    }

    pub fn name(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn exists(&self) -> Result<bool> {
        self.backend.exists(&self.path).await
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        self.backend.read(&self.path).await
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.backend.write(&self.path, data).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.backend.rm(&self.path).await
    }
}

/// A named, namespaced collection of files plus a metadata map, rooted at
/// `artifacts/{namespace}/{name}` on the backing `FileBackend`.
pub struct Artifact {
    backend: Arc<dyn FileBackend>,
    namespace: String,
    name: String,
    path: String,
}

impl Artifact {
    pub(crate) fn new(backend: Arc<dyn FileBackend>, namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = validate_artifact_name(&name.into())?.to_string();
        let path = join(&["artifacts", &namespace, &name]);
        Ok(Self { backend, namespace, name, path })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn exists(&self) -> Result<bool> {
        self.backend.exists(&self.path).await
    }

    async fn ensure_exists(&self) -> Result<()> {
        if !self.exists().await? {
            return Err(DagforgeError::not_found(format!(
                "no artifact `{}` in namespace `{}`",
                self.name, self.namespace
            )));
        }
        Ok(())
    }

    /// Creates the artifact's directory if it doesn't already exist. A
    /// no-op if it does.
    pub async fn create(&self) -> Result<()> {
        self.backend.mkdir(&self.path).await
    }

    pub async fn list_files(&self, include_meta: bool) -> Result<Vec<ArtifactFile>> {
        self.ensure_exists().await?;
        let names = self.backend.list(&self.path).await?;
        names
            .into_iter()
            .filter(|n| include_meta || n != METADATA_FILENAME)
            .map(|n| ArtifactFile::new(self.backend.clone(), &self.path, &n))
            .collect()
    }

    pub async fn has_file(&self, filename: &str) -> Result<bool> {
        self.ensure_exists().await?;
        let file = ArtifactFile::new(self.backend.clone(), &self.path, filename)?;
        file.exists().await
    }

    /// Fetches an existing file, or creates it empty when `create` is true
    /// and it's missing.
    pub async fn get_file(&self, filename: &str, create: bool) -> Result<ArtifactFile> {
        self.ensure_exists().await?;
        let file = ArtifactFile::new(self.backend.clone(), &self.path, filename)?;
        if file.exists().await? {
            Ok(file)
        } else if create {
            self.new_file(filename, None, true).await
        } else {
            Err(DagforgeError::not_found(format!("artifact file {filename}")))
        }
    }

    /// Creates a new file with optional content. When `exist_ok` is true
    /// and the file already exists, returns the existing file untouched
    /// rather than erroring.
    pub async fn new_file(&self, filename: &str, content: Option<&[u8]>, exist_ok: bool) -> Result<ArtifactFile> {
        self.ensure_exists().await?;
        let file = ArtifactFile::new(self.backend.clone(), &self.path, filename)?;
        if file.exists().await? {
            if exist_ok {
                return Ok(file);
            }
            return Err(DagforgeError::conflict(format!("artifact file {filename} already exists")));
        }
        self.backend.write(&file.path, content.unwrap_or(&[])).await?;
        Ok(file)
    }

    pub async fn delete_file(&self, filename: &str) -> Result<()> {
        self.ensure_exists().await?;
        let file = ArtifactFile::new(self.backend.clone(), &self.path, filename)?;
        file.delete().await
    }

    /// Removes every file in the artifact (except `.artifact.json`'s
    /// caller-visible content is reset too) but keeps the artifact
    /// directory itself.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_exists().await?;
        for file in self.list_files(true).await? {
            file.delete().await?;
        }
        Ok(())
    }

    /// Removes the artifact directory and everything in it.
    pub async fn delete(&self) -> Result<()> {
        self.ensure_exists().await?;
        self.backend.rm_recursive(&self.path).await
    }

    async fn read_metadata(&self) -> Result<Map<String, Value>> {
        let meta_path = join(&[&self.path, METADATA_FILENAME]);
        if !self.backend.exists(&meta_path).await? {
            return Ok(Map::new());
        }
        let raw = self.backend.read(&meta_path).await?;
        if raw.is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_slice(&raw).map_err(|e| DagforgeError::Internal(e.into()))
    }

    async fn write_metadata(&self, metadata: &Map<String, Value>) -> Result<()> {
        let meta_path = join(&[&self.path, METADATA_FILENAME]);
        let raw = serde_json::to_vec(metadata).map_err(|e| DagforgeError::Internal(e.into()))?;
        self.backend.write(&meta_path, &raw).await
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_exists().await?;
        Ok(self.read_metadata().await?.get(key).cloned())
    }

    pub async fn set_meta(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_exists().await?;
        let mut metadata = self.read_metadata().await?;
        metadata.insert(key.to_string(), value);
        self.write_metadata(&metadata).await
    }

    pub async fn delete_meta(&self, key: &str) -> Result<()> {
        self.ensure_exists().await?;
        let mut metadata = self.read_metadata().await?;
        if metadata.remove(key).is_some() {
            self.write_metadata(&metadata).await?;
        }
        Ok(())
    }
}

/// Entry point: resolves `Artifact` handles rooted at one `FileBackend`.
pub struct ArtifactStore {
    backend: Arc<dyn FileBackend>,
}

impl ArtifactStore {
    pub fn new(backend: Arc<dyn FileBackend>) -> Self {
        Self { backend }
    }

    /// Returns a handle to the artifact, creating its directory if absent.
    pub async fn get_or_create(&self, namespace: &str, name: &str) -> Result<Artifact> {
        let artifact = Artifact::new(self.backend.clone(), namespace, name)?;
        artifact.create().await?;
        Ok(artifact)
    }

    /// Returns a handle without touching the filesystem; callers that only
    /// want to check `exists()` can skip the implicit `mkdir`.
    pub fn handle(&self, namespace: &str, name: &str) -> Result<Artifact> {
        Artifact::new(self.backend.clone(), namespace, name)
    }

    pub async fn list_artifacts(&self, namespace: &str) -> Result<Vec<String>> {
        self.backend.list(&join(&["artifacts", namespace])).await
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        self.backend.list("artifacts").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalDiskBackend;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn FileBackend> = Arc::new(LocalDiskBackend::new(dir.path()));
        (dir, ArtifactStore::new(backend))
    }

    #[tokio::test]
    async fn get_or_create_then_new_file_round_trips_content() {
        let (_dir, store) = store();
        let artifact = store.get_or_create("default", "model").await.unwrap();
        let file = artifact.new_file("weights.bin", Some(b"abc"), true).await.unwrap();
        assert_eq!(file.read().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn new_file_without_exist_ok_conflicts_on_second_call() {
        let (_dir, store) = store();
        let artifact = store.get_or_create("default", "model").await.unwrap();
        artifact.new_file("a.txt", None, true).await.unwrap();
        let err = artifact.new_file("a.txt", None, false).await.unwrap_err();
        assert!(matches!(err, DagforgeError::Conflict(_)));
    }

    #[tokio::test]
    async fn operating_on_a_missing_artifact_is_not_found() {
        let (_dir, store) = store();
        let artifact = store.handle("default", "ghost").unwrap();
        let err = artifact.list_files(false).await.unwrap_err();
        assert!(matches!(err, DagforgeError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn metadata_round_trips_and_excludes_from_list_files_by_default() {
        let (_dir, store) = store();
        let artifact = store.get_or_create("default", "model").await.unwrap();
        artifact.set_meta("value_type", Value::String("json".to_string())).await.unwrap();
        artifact.new_file("a.txt", None, true).await.unwrap();

        assert_eq!(artifact.get_meta("value_type").await.unwrap(), Some(Value::String("json".to_string())));

        let visible = artifact.list_files(false).await.unwrap();
        assert_eq!(visible.len(), 1);
        let with_meta = artifact.list_files(true).await.unwrap();
        assert_eq!(with_meta.len(), 2);
    }

    #[tokio::test]
    async fn clear_removes_files_but_keeps_the_artifact() {
        let (_dir, store) = store();
        let artifact = store.get_or_create("default", "model").await.unwrap();
        artifact.new_file("a.txt", None, true).await.unwrap();
        artifact.clear().await.unwrap();
        assert!(artifact.exists().await.unwrap());
        assert!(artifact.list_files(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_the_whole_artifact() {
        let (_dir, store) = store();
        let artifact = store.get_or_create("default", "model").await.unwrap();
        artifact.delete().await.unwrap();
        assert!(!artifact.exists().await.unwrap());
    }
}
