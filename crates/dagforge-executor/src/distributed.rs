// Distributed executor: same Executor contract as the local backend, but
// submission goes to a remote worker pool over a connection string instead
// of an in-process semaphore. Only the connection and submission plumbing
// differ; DAG walking is shared via `dagforge_core::runtime::execute_graph`.

use std::sync::Arc;

use async_trait::async_trait;
use dagforge_core::context::WorkflowRunContext;
use dagforge_core::error::{DagforgeError, Result};
use dagforge_core::runtime::{Executor, LazyValue};
use dagforge_core::stage::BaseStage;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

/// Where the remote worker pool's scheduler lives. Analogous to a dask
/// scheduler address or a ray cluster's connection string.
#[derive(Debug, Clone)]
pub struct ClusterAddress(pub String);

/// Thin client for a remote worker pool. `submit`/`await_result` are the
/// seam a real cluster backend fills in; the in-process stand-in here
/// simply runs the stage locally so the crate has a complete, testable
/// `Executor` for the `"distributed"` configuration value without requiring
/// a live cluster in this workspace's test suite.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn connect(&self, address: &ClusterAddress) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn submit(
        &self,
        stage: Arc<BaseStage>,
        context: WorkflowRunContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value>;
    fn worker_count(&self) -> usize;
}

/// In-process stand-in implementing `ClusterClient` by invoking the target
/// directly. A real deployment swaps this for a client that submits over
/// the network; `DistributedExecutor` itself doesn't change.
pub struct LocalStandInClient {
    connected: RwLock<bool>,
}

impl LocalStandInClient {
    pub fn new() -> Self {
        Self { connected: RwLock::new(false) }
    }
}

impl Default for LocalStandInClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterClient for LocalStandInClient {
    async fn connect(&self, _address: &ClusterAddress) -> Result<()> {
        *self.connected.write().await = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.connected.write().await = false;
        Ok(())
    }

    async fn submit(
        &self,
        stage: Arc<BaseStage>,
        context: WorkflowRunContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        if !*self.connected.read().await {
            return Err(DagforgeError::ExecutorUnavailable("cluster client not connected".to_string()));
        }
        let signature = stage.target.signature();
        let mut merged = Map::new();
        for (name, value) in signature.params.iter().zip(args.into_iter()) {
            merged.insert(name.clone(), value);
        }
        for (k, v) in kwargs {
            merged.insert(k, v);
        }
        stage.target.invoke(merged, &context).await
    }

    fn worker_count(&self) -> usize {
        1
    }
}

/// `Executor` backed by a remote worker pool reached through `ClusterClient`.
/// Resource checks compare declared stage requirements against
/// `max_cpus`/`max_gpus` supplied at construction (a future real cluster
/// backend would instead query live worker capacity).
pub struct DistributedExecutor {
    address: ClusterAddress,
    client: Arc<dyn ClusterClient>,
    max_cpus: f64,
    max_gpus: f64,
}

impl DistributedExecutor {
    pub fn new(address: impl Into<String>, client: Arc<dyn ClusterClient>, max_cpus: f64, max_gpus: f64) -> Self {
        Self {
            address: ClusterAddress(address.into()),
            client,
            max_cpus,
            max_gpus,
        }
    }
}

#[async_trait]
impl Executor for DistributedExecutor {
    async fn start(&self) -> Result<()> {
        self.client.connect(&self.address).await
    }

    async fn close(&self) -> Result<()> {
        self.client.disconnect().await
    }

    async fn environment_info(&self) -> Value {
        json!({
            "executor": "distributed",
            "address": self.address.0,
            "workers": self.client.worker_count(),
            "max_cpus": self.max_cpus,
            "max_gpus": self.max_gpus,
        })
    }

    fn check_resources(&self, stage: &BaseStage) -> Result<()> {
        let required = stage.get_required_resources();
        if let Some(cpus) = required.get("cpus") {
            if *cpus > self.max_cpus {
                return Err(DagforgeError::ResourceExhausted(format!(
                    "stage `{}` requires {cpus} cpus but the cluster advertises {}",
                    stage.name, self.max_cpus
                )));
            }
        }
        if let Some(gpus) = required.get("gpus") {
            if *gpus > self.max_gpus {
                return Err(DagforgeError::ResourceExhausted(format!(
                    "stage `{}` requires {gpus} gpus but the cluster advertises {}",
                    stage.name, self.max_gpus
                )));
            }
        }
        Ok(())
    }

    fn lazy(&self, stage: Arc<BaseStage>, context: WorkflowRunContext, args: Vec<Value>, kwargs: Map<String, Value>) -> LazyValue {
        let client = self.client.clone();
        Box::pin(async move { client.submit(stage, context, args, kwargs).await })
    }

    fn mapped_lazy(
        &self,
        stage: Arc<BaseStage>,
        context: WorkflowRunContext,
        iterable: Vec<Value>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> LazyValue {
        let client = self.client.clone();
        Box::pin(async move {
            let mut futures = Vec::with_capacity(iterable.len());
            for item in iterable {
                let mut item_args = vec![item];
                item_args.extend(args.iter().cloned());
                futures.push(client.submit(stage.clone(), context.clone(), item_args, kwargs.clone()));
            }
            let outputs = futures::future::try_join_all(futures).await?;
            Ok(Value::Array(outputs))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as async_trait_attr;
    use dagforge_core::model::StageResources;
    use dagforge_core::stage::StageKind;
    use dagforge_core::targets::{StageTarget, TargetSignature};

    struct Identity;

    #[async_trait_attr]
    impl StageTarget for Identity {
        fn signature(&self) -> TargetSignature {
            TargetSignature { params: vec!["x".to_string()], accepts_var_kwargs: false }
        }

        async fn invoke(&self, args: Map<String, Value>, _context: &WorkflowRunContext) -> Result<Value> {
            Ok(args.get("x").cloned().unwrap_or(Value::Null))
        }
    }

    fn stage() -> Arc<BaseStage> {
        Arc::new(BaseStage {
            kind: StageKind::Simple,
            name: "identity".to_string(),
            depends_on: vec![],
            description: String::new(),
            version: String::new(),
            resources: StageResources::default(),
            priority: None,
            map_on: None,
            target: Arc::new(Identity),
        })
    }

    fn context() -> WorkflowRunContext {
        WorkflowRunContext::new(uuid::Uuid::now_v7(), "wf", "default", Map::new(), Map::new())
    }

    #[tokio::test]
    async fn submit_fails_before_connect() {
        let client: Arc<dyn ClusterClient> = Arc::new(LocalStandInClient::new());
        let executor = DistributedExecutor::new("cluster:1234", client, 4.0, 0.0);
        let result = executor.lazy(stage(), context(), vec![Value::from(1)], Map::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_then_lazy_round_trips_the_value() {
        let client: Arc<dyn ClusterClient> = Arc::new(LocalStandInClient::new());
        let executor = DistributedExecutor::new("cluster:1234", client, 4.0, 0.0);
        executor.start().await.unwrap();
        let result = executor
            .lazy(stage(), context(), vec![Value::from(7)], Map::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from(7));
    }
}
