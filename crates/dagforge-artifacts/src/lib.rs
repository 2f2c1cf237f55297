//! Artifact store: namespaced file trees (`artifacts/{namespace}/{name}`)
//! with a reserved metadata sidecar file and pluggable value handlers for
//! persisting typed values into them.

pub mod artifact;
pub mod backend;
pub mod handler;
pub mod validate;

pub use artifact::{Artifact, ArtifactFile, ArtifactStore};
pub use backend::{FileBackend, LocalDiskBackend};
