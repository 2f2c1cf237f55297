// Buffered write log with nested savepoints. Callers stage Insert/Update/
// Delete operations against a `Transaction`, which replays them against a
// backend's in-memory view on `commit()` and discards them on `rollback()`.
// Savepoints let a caller retry a sub-sequence of operations without undoing
// everything staged before it.

use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum Operation {
    Insert { collection: String, doc_id: Uuid, document: Value },
    Update { collection: String, doc_id: Uuid, document: Value },
    Delete { collection: String, doc_id: Uuid },
}

impl Operation {
    pub fn collection(&self) -> &str {
        match self {
            Operation::Insert { collection, .. } => collection,
            Operation::Update { collection, .. } => collection,
            Operation::Delete { collection, .. } => collection,
        }
    }

    pub fn doc_id(&self) -> Uuid {
        match self {
            Operation::Insert { doc_id, .. } => *doc_id,
            Operation::Update { doc_id, .. } => *doc_id,
            Operation::Delete { doc_id, .. } => *doc_id,
        }
    }
}

/// A buffered, nestable sequence of writes. `savepoint()` marks the current
/// length of the log; `rollback_to(savepoint)` truncates back to it. A bare
/// `rollback()` truncates to zero. Nothing in `operations()` is visible to a
/// backend until the owning caller replays the log at commit time.
#[derive(Debug, Default)]
pub struct Transaction {
    operations: Vec<Operation>,
}

/// An opaque marker into a transaction's operation log, returned by
/// `savepoint()` and consumed by `rollback_to()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: impl Into<String>, doc_id: Uuid, document: Value) {
        self.operations.push(Operation::Insert { collection: collection.into(), doc_id, document });
    }

    pub fn update(&mut self, collection: impl Into<String>, doc_id: Uuid, document: Value) {
        self.operations.push(Operation::Update { collection: collection.into(), doc_id, document });
    }

    pub fn delete(&mut self, collection: impl Into<String>, doc_id: Uuid) {
        self.operations.push(Operation::Delete { collection: collection.into(), doc_id });
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.operations.len())
    }

    /// Discard every operation staged since `savepoint` was taken. Taking a
    /// savepoint and immediately rolling back to it is a no-op.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.operations.truncate(savepoint.0);
    }

    /// Discard the entire log, as if the transaction had just been created.
    pub fn rollback(&mut self) {
        self.operations.clear();
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Drain the log in the order operations were staged, for a backend's
    /// commit replay.
    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Runs `body` inside a transaction, rolling back to the pre-call savepoint
/// if `body` returns an error or panics-as-error path (the caller's `?`
/// propagation), and otherwise leaving the operations staged for the caller
/// to commit. Mirrors a nested `with transaction.savepoint():` block: on an
/// `Err`, every operation staged during `body` is undone and the log is left
/// exactly as it was before the call.
pub fn with_savepoint<T, E>(
    txn: &mut Transaction,
    body: impl FnOnce(&mut Transaction) -> Result<T, E>,
) -> Result<T, E> {
    let savepoint = txn.savepoint();
    match body(txn) {
        Ok(value) => Ok(value),
        Err(err) => {
            txn.rollback_to(savepoint);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rollback_to_savepoint_discards_only_later_operations() {
        let mut txn = Transaction::new();
        txn.insert("workflow", Uuid::nil(), json!({"a": 1}));
        let sp = txn.savepoint();
        txn.insert("workflow", Uuid::nil(), json!({"b": 2}));
        txn.delete("workflow", Uuid::nil());
        assert_eq!(txn.operations().len(), 3);

        txn.rollback_to(sp);
        assert_eq!(txn.operations().len(), 1);
    }

    #[test]
    fn bare_rollback_clears_everything() {
        let mut txn = Transaction::new();
        txn.insert("workflow", Uuid::nil(), json!({}));
        txn.rollback();
        assert!(txn.is_empty());
    }

    #[test]
    fn with_savepoint_undoes_operations_staged_by_a_failing_body() {
        let mut txn = Transaction::new();
        txn.insert("workflow", Uuid::nil(), json!({"a": 1}));

        let result: Result<(), &str> = with_savepoint(&mut txn, |inner| {
            inner.insert("workflow", Uuid::nil(), json!({"b": 2}));
            Err("boom")
        });

        assert!(result.is_err());
        assert_eq!(txn.operations().len(), 1);
    }

    #[test]
    fn with_savepoint_keeps_operations_on_success() {
        let mut txn = Transaction::new();
        let result: Result<(), &str> = with_savepoint(&mut txn, |inner| {
            inner.insert("workflow", Uuid::nil(), json!({"a": 1}));
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(txn.operations().len(), 1);
    }
}
