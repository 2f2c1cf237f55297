// Revision-chain migrations. Each `Revision` names its own id and the id of
// the revision it builds on; `Migrator` walks the chain with BFS so
// revisions can be registered in any order and still resolve correctly.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use dagforge_core::error::{DagforgeError, Result};
use serde_json::json;
use uuid::Uuid;

use crate::backend::ResourceStorage;

const MIGRATIONS_COLLECTION: &str = "_migrate";
const HEAD_DOC_NAME: &str = "head";

/// One migration step. `id` and `down_revision_id` form a singly-linked
/// chain back to the root (`down_revision_id() == None`). DDL is applied
/// through `ops`, the same trait object the rest of the store uses, so a
/// revision can create collections, add/rename/drop fields, and add/drop
/// indexes without a separate migration-only API.
#[async_trait]
pub trait Revision: Send + Sync {
    fn id(&self) -> &'static str;
    fn down_revision_id(&self) -> Option<&'static str>;

    async fn upgrade(&self, ops: &dyn ResourceStorage) -> Result<()>;
    async fn downgrade(&self, ops: &dyn ResourceStorage) -> Result<()>;
}

/// Resolves and applies revision chains, tracking the current head in the
/// `_migrate` collection so a restart picks up where it left off.
pub struct Migrator {
    revisions: HashMap<&'static str, Box<dyn Revision>>,
}

impl Migrator {
    pub fn new(revisions: Vec<Box<dyn Revision>>) -> Self {
        let revisions = revisions.into_iter().map(|r| (r.id(), r)).collect();
        Self { revisions }
    }

    fn root_id(&self) -> Option<&'static str> {
        self.revisions.values().find(|r| r.down_revision_id().is_none()).map(|r| r.id())
    }

    /// Forward chain from `root` to `target` inclusive, in upgrade order.
    /// Returns an error if `target` is unknown or unreachable from any root.
    fn path_to(&self, target: &str) -> Result<Vec<&'static str>> {
        let Some(target_key) = self.revisions.get_key_value(target).map(|(k, _)| *k) else {
            return Err(DagforgeError::validation(format!("unknown revision: {target}")));
        };

        // BFS backward from target following down_revision_id until a root
        // (None) is reached, then reverse for upgrade order.
        let mut chain = vec![target_key];
        let mut current = target_key;
        let mut seen = HashSet::from([current]);
        loop {
            let revision = &self.revisions[current];
            match revision.down_revision_id() {
                None => break,
                Some(parent) => {
                    if !seen.insert(parent) {
                        return Err(DagforgeError::validation("revision chain has a cycle"));
                    }
                    let Some(parent_key) = self.revisions.get_key_value(parent).map(|(k, _)| *k) else {
                        return Err(DagforgeError::validation(format!("dangling down_revision: {parent}")));
                    };
                    chain.push(parent_key);
                    current = parent_key;
                }
            }
        }
        chain.reverse();
        Ok(chain)
    }

    async fn current_head(&self, storage: &dyn ResourceStorage) -> Result<Option<String>> {
        storage.ensure_collection(MIGRATIONS_COLLECTION).await?;
        match storage.get_by_name(MIGRATIONS_COLLECTION, HEAD_DOC_NAME).await? {
            Some(doc) => Ok(doc.get("revision_id").and_then(|v| v.as_str()).map(str::to_string)),
            None => Ok(None),
        }
    }

    async fn set_head(&self, storage: &dyn ResourceStorage, revision_id: Option<&str>) -> Result<()> {
        let document = json!({"doc_id": Uuid::nil(), "name": HEAD_DOC_NAME, "revision_id": revision_id});
        match storage.get_by_name(MIGRATIONS_COLLECTION, HEAD_DOC_NAME).await? {
            Some(_) => storage.update(MIGRATIONS_COLLECTION, Uuid::nil(), document).await,
            None => storage.insert(MIGRATIONS_COLLECTION, Uuid::nil(), document).await,
        }
    }

    /// Upgrade from the current recorded head up to `target` (or the most
    /// recently registered leaf if `target` is `None`), applying every
    /// revision on the path in order.
    pub async fn upgrade(&self, storage: &dyn ResourceStorage, target: Option<&str>) -> Result<()> {
        let target = match target {
            Some(id) => id.to_string(),
            None => self.latest_leaf()?.to_string(),
        };
        let full_path = self.path_to(&target)?;
        let current = self.current_head(storage).await?;
        let start_index = match &current {
            None => 0,
            Some(head) => full_path.iter().position(|id| *id == head).map(|i| i + 1).unwrap_or(0),
        };

        for &revision_id in &full_path[start_index..] {
            self.revisions[revision_id].upgrade(storage).await?;
            self.set_head(storage, Some(revision_id)).await?;
            tracing::info!(revision = revision_id, "applied migration");
        }
        Ok(())
    }

    /// Downgrade from the current head back to (and excluding) `target`.
    pub async fn downgrade(&self, storage: &dyn ResourceStorage, target: &str) -> Result<()> {
        let Some(head) = self.current_head(storage).await? else {
            return Ok(());
        };
        let full_path = self.path_to(&head)?;
        let Some(target_index) = full_path.iter().position(|id| *id == target) else {
            return Err(DagforgeError::validation(format!("unknown downgrade target: {target}")));
        };

        for &revision_id in full_path[target_index + 1..].iter().rev() {
            self.revisions[revision_id].downgrade(storage).await?;
            let new_head = self.revisions[revision_id].down_revision_id();
            self.set_head(storage, new_head).await?;
            tracing::info!(revision = revision_id, "reverted migration");
        }
        Ok(())
    }

    fn latest_leaf(&self) -> Result<&'static str> {
        let parents: HashSet<&str> = self.revisions.values().filter_map(|r| r.down_revision_id()).collect();
        self.revisions
            .keys()
            .find(|id| !parents.contains(*id))
            .copied()
            .ok_or_else(|| DagforgeError::validation("no leaf revision found (cycle or empty chain)"))
    }
}

/// Breadth-first walk of the chain from `root_id`, used by tests and by
/// tooling that needs every registered revision in dependency order rather
/// than just the path to one target.
pub fn ordered_from_root<'a>(revisions: &HashMap<&'a str, Box<dyn Revision>>, root_id: &'a str) -> Vec<&'a str> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, revision) in revisions {
        if let Some(parent) = revision.down_revision_id() {
            children.entry(parent).or_default().push(id);
        }
    }

    let mut order = vec![root_id];
    let mut queue = VecDeque::from([root_id]);
    while let Some(current) = queue.pop_front() {
        for &child in children.get(current).into_iter().flatten() {
            order.push(child);
            queue.push_back(child);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRevision {
        id: &'static str,
        down: Option<&'static str>,
        applied: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Revision for CountingRevision {
        fn id(&self) -> &'static str {
            self.id
        }
        fn down_revision_id(&self) -> Option<&'static str> {
            self.down
        }
        async fn upgrade(&self, _ops: &dyn ResourceStorage) -> Result<()> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn downgrade(&self, _ops: &dyn ResourceStorage) -> Result<()> {
            self.applied.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn upgrade_applies_the_full_chain_in_order() {
        let applied = Arc::new(AtomicUsize::new(0));
        let migrator = Migrator::new(vec![
            Box::new(CountingRevision { id: "v1", down: None, applied: applied.clone() }),
            Box::new(CountingRevision { id: "v2", down: Some("v1"), applied: applied.clone() }),
            Box::new(CountingRevision { id: "v3", down: Some("v2"), applied: applied.clone() }),
        ]);
        let storage = InMemoryStorage::new();
        migrator.upgrade(&storage, None).await.unwrap();
        assert_eq!(applied.load(Ordering::SeqCst), 3);
        assert_eq!(migrator.current_head(&storage).await.unwrap().as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn upgrade_is_idempotent_when_already_at_head() {
        let applied = Arc::new(AtomicUsize::new(0));
        let migrator = Migrator::new(vec![
            Box::new(CountingRevision { id: "v1", down: None, applied: applied.clone() }),
            Box::new(CountingRevision { id: "v2", down: Some("v1"), applied: applied.clone() }),
        ]);
        let storage = InMemoryStorage::new();
        migrator.upgrade(&storage, None).await.unwrap();
        migrator.upgrade(&storage, None).await.unwrap();
        assert_eq!(applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn downgrade_reverts_back_to_target() {
        let applied = Arc::new(AtomicUsize::new(0));
        let migrator = Migrator::new(vec![
            Box::new(CountingRevision { id: "v1", down: None, applied: applied.clone() }),
            Box::new(CountingRevision { id: "v2", down: Some("v1"), applied: applied.clone() }),
        ]);
        let storage = InMemoryStorage::new();
        migrator.upgrade(&storage, None).await.unwrap();
        migrator.downgrade(&storage, "v1").await.unwrap();
        assert_eq!(applied.load(Ordering::SeqCst), 1);
        assert_eq!(migrator.current_head(&storage).await.unwrap().as_deref(), Some("v1"));
    }
}
