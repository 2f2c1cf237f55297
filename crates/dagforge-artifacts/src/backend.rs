// Filesystem abstraction the artifact store is built on. `LocalDiskBackend`
// is the only implementation today; the trait exists so a future object-
// storage backend (S3, GCS) can stand in without touching `artifact.rs`.

use async_trait::async_trait;
use dagforge_core::error::{DagforgeError, Result};
use std::path::{Path, PathBuf};

#[async_trait]
pub trait FileBackend: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn mkdir(&self, path: &str) -> Result<()>;
    /// Lists direct children (files and directories) of `path`. Returns an
    /// empty vec, not an error, if `path` doesn't exist.
    async fn list(&self, path: &str) -> Result<Vec<String>>;
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;
    async fn touch(&self, path: &str) -> Result<()>;
    async fn rm(&self, path: &str) -> Result<()>;
    /// Removes `path` and everything under it.
    async fn rm_recursive(&self, path: &str) -> Result<()>;
}

/// Rooted at `root`; every path the store passes in is relative to it.
pub struct LocalDiskBackend {
    root: PathBuf,
}

impl LocalDiskBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

fn io_err(err: std::io::Error) -> DagforgeError {
    DagforgeError::Internal(err.into())
}

#[async_trait]
impl FileBackend for LocalDiskBackend {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await.map_err(io_err)?)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.resolve(path)).await.map_err(io_err)
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let resolved = self.resolve(path);
        if !resolved.exists() {
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(&resolved).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve(path);
        if !resolved.exists() {
            return Err(DagforgeError::not_found(path.to_string()));
        }
        tokio::fs::read(resolved).await.map_err(io_err)
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(resolved, data).await.map_err(io_err)
    }

    async fn touch(&self, path: &str) -> Result<()> {
        self.write(path, &[]).await
    }

    async fn rm(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path);
        if !resolved.exists() {
            return Err(DagforgeError::not_found(path.to_string()));
        }
        tokio::fs::remove_file(resolved).await.map_err(io_err)
    }

    async fn rm_recursive(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path);
        if !resolved.exists() {
            return Err(DagforgeError::not_found(path.to_string()));
        }
        if resolved.is_dir() {
            tokio::fs::remove_dir_all(resolved).await.map_err(io_err)
        } else {
            tokio::fs::remove_file(resolved).await.map_err(io_err)
        }
    }
}

pub(crate) fn join(parts: &[&str]) -> String {
    Path::new(&parts.join("/")).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalDiskBackend::new(dir.path());
        backend.write("a/b.txt", b"hello").await.unwrap();
        assert_eq!(backend.read("a/b.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn read_of_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalDiskBackend::new(dir.path());
        let err = backend.read("missing").await.unwrap_err();
        assert!(matches!(err, DagforgeError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn list_on_missing_directory_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalDiskBackend::new(dir.path());
        assert!(backend.list("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rm_recursive_removes_a_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalDiskBackend::new(dir.path());
        backend.write("tree/one.txt", b"1").await.unwrap();
        backend.write("tree/two.txt", b"2").await.unwrap();
        backend.rm_recursive("tree").await.unwrap();
        assert!(!backend.exists("tree").await.unwrap());
    }
}
