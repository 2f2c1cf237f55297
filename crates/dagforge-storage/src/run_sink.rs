// Adapts a `ResourceStorage` backend into the narrow `RunSink` the runtime
// calls to persist run records, keyed in the "run" collection by `doc_id`.

use async_trait::async_trait;
use dagforge_core::error::{DagforgeError, Result};
use dagforge_core::model::WorkflowRun;
use dagforge_core::runtime::RunSink;
use serde_json::to_value;
use std::sync::Arc;

use crate::backend::ResourceStorage;

const RUN_COLLECTION: &str = "run";

pub struct StorageRunSink {
    storage: Arc<dyn ResourceStorage>,
}

impl StorageRunSink {
    pub fn new(storage: Arc<dyn ResourceStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl RunSink for StorageRunSink {
    async fn persist(&self, run: &WorkflowRun) -> Result<()> {
        let document = to_value(run).map_err(|e| DagforgeError::Internal(e.into()))?;
        match self.storage.get(RUN_COLLECTION, run.doc_id).await? {
            Some(_) => self.storage.update(RUN_COLLECTION, run.doc_id, document).await,
            None => self.storage.insert(RUN_COLLECTION, run.doc_id, document).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use dagforge_core::model::RunState;
    use serde_json::Value;

    #[tokio::test]
    async fn persist_inserts_then_updates_the_same_run() {
        let storage: Arc<dyn ResourceStorage> = Arc::new(InMemoryStorage::new());
        let sink = StorageRunSink::new(storage.clone());

        let mut run = WorkflowRun::new("wf1", "manual");
        sink.persist(&run).await.unwrap();

        run.set_finished(Value::Null, RunState::Finished);
        sink.persist(&run).await.unwrap();

        let stored = storage.get("run", run.doc_id).await.unwrap().unwrap();
        assert_eq!(stored["state"], Value::String("finished".to_string()));
    }
}
