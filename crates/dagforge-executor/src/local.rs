// In-process executor: runs every stage as a Tokio task, bounding
// concurrency with a semaphore sized from configured CPU budget. This is the
// default executor and the one every workflow test in this workspace runs
// against.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dagforge_core::context::WorkflowRunContext;
use dagforge_core::error::{DagforgeError, Result};
use dagforge_core::runtime::{Executor, LazyValue};
use dagforge_core::stage::BaseStage;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;

use crate::cluster_memory::{ClusterMemoryServer, LocalClusterMemory};

/// Flattens positional args against the target's declared parameter order,
/// then layers kwargs on top (kwargs win on key collision, though
/// `BaseStage::bind_args` never produces both for the same stage).
fn assemble_invoke_args(stage: &BaseStage, args: Vec<Value>, kwargs: Map<String, Value>) -> Map<String, Value> {
    let signature = stage.target.signature();
    let mut merged = Map::new();
    for (name, value) in signature.params.iter().zip(args.into_iter()) {
        merged.insert(name.clone(), value);
    }
    for (k, v) in kwargs {
        merged.insert(k, v);
    }
    merged
}

/// Runs every stage inline within this process using `tokio::spawn`,
/// bounded by `max_concurrency` simultaneous stage invocations. Backed by a
/// `ClusterMemoryServer` so parameterized stages that fan out across tasks
/// can still share large intermediate values by reference.
pub struct LocalExecutor {
    semaphore: Arc<Semaphore>,
    max_cpus: f64,
    max_gpus: f64,
    cluster_memory: Arc<tokio::sync::Mutex<Option<ClusterMemoryServer>>>,
    cluster_memory_socket: std::path::PathBuf,
    active_tasks: Arc<AtomicUsize>,
}

impl LocalExecutor {
    pub fn new(worker_count: usize, max_cpus: f64, max_gpus: f64, cluster_memory_socket: impl Into<std::path::PathBuf>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(worker_count.max(1))),
            max_cpus,
            max_gpus,
            cluster_memory: Arc::new(tokio::sync::Mutex::new(None)),
            cluster_memory_socket: cluster_memory_socket.into(),
            active_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(config: &dagforge_core::Configuration) -> Self {
        let workers = config.executor_cpus.unwrap_or_else(|| num_cpus::get().saturating_sub(1).max(1));
        Self::new(workers, workers as f64, 0.0, &config.cluster_memory_socket_path)
    }

    /// The in-process cluster-memory handle, if the socket bound
    /// successfully during `start`. Parameterized stages that want to share
    /// large values by reference use this instead of returning them inline.
    pub async fn cluster_memory(&self) -> Option<LocalClusterMemory> {
        self.cluster_memory.lock().await.as_ref().map(|server| server.local_client())
    }

    async fn ensure_cluster_memory(&self) {
        let mut guard = self.cluster_memory.lock().await;
        if guard.is_none() {
            match ClusterMemoryServer::bind(&self.cluster_memory_socket).await {
                Ok(server) => *guard = Some(server),
                Err(err) => {
                    tracing::warn!(error = %err, "cluster memory server failed to bind, continuing without it");
                }
            }
        }
    }

    async fn invoke_stage(stage: Arc<BaseStage>, context: WorkflowRunContext, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value> {
        let merged = assemble_invoke_args(&stage, args, kwargs);
        stage.target.invoke(merged, &context).await
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn start(&self) -> Result<()> {
        self.ensure_cluster_memory().await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.cluster_memory.lock().await;
        if let Some(mut server) = guard.take() {
            server.shutdown();
        }
        Ok(())
    }

    async fn environment_info(&self) -> Value {
        json!({
            "executor": "local",
            "max_concurrency": self.semaphore.available_permits(),
            "max_cpus": self.max_cpus,
            "max_gpus": self.max_gpus,
            "active_tasks": self.active_tasks.load(Ordering::Relaxed),
        })
    }

    fn check_resources(&self, stage: &BaseStage) -> Result<()> {
        let required = stage.get_required_resources();
        if let Some(cpus) = required.get("cpus") {
            if *cpus > self.max_cpus {
                return Err(DagforgeError::ResourceExhausted(format!(
                    "stage `{}` requires {cpus} cpus but the local executor has {}",
                    stage.name, self.max_cpus
                )));
            }
        }
        if let Some(gpus) = required.get("gpus") {
            if *gpus > self.max_gpus {
                return Err(DagforgeError::ResourceExhausted(format!(
                    "stage `{}` requires {gpus} gpus but the local executor has {}",
                    stage.name, self.max_gpus
                )));
            }
        }
        Ok(())
    }

    fn lazy(&self, stage: Arc<BaseStage>, context: WorkflowRunContext, args: Vec<Value>, kwargs: Map<String, Value>) -> LazyValue {
        let semaphore = self.semaphore.clone();
        let active = self.active_tasks.clone();
        Box::pin(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| DagforgeError::ExecutorUnavailable(e.to_string()))?;
            active.fetch_add(1, Ordering::Relaxed);
            let result = Self::invoke_stage(stage, context, args, kwargs).await;
            active.fetch_sub(1, Ordering::Relaxed);
            result
        })
    }

    fn mapped_lazy(
        &self,
        stage: Arc<BaseStage>,
        context: WorkflowRunContext,
        iterable: Vec<Value>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> LazyValue {
        let semaphore = self.semaphore.clone();
        let active = self.active_tasks.clone();
        Box::pin(async move {
            let mut handles = Vec::with_capacity(iterable.len());
            for item in iterable {
                let stage = stage.clone();
                let context = context.clone();
                let mut item_args = vec![item];
                item_args.extend(args.iter().cloned());
                let kwargs = kwargs.clone();
                let semaphore = semaphore.clone();
                let active = active.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| DagforgeError::ExecutorUnavailable(e.to_string()))?;
                    active.fetch_add(1, Ordering::Relaxed);
                    let result = Self::invoke_stage(stage, context, item_args, kwargs).await;
                    active.fetch_sub(1, Ordering::Relaxed);
                    result
                }));
            }

            let mut outputs = Vec::with_capacity(handles.len());
            for handle in handles {
                let value = handle
                    .await
                    .map_err(|e| DagforgeError::ExecutorUnavailable(format!("mapped stage task panicked: {e}")))??;
                outputs.push(value);
            }
            Ok(Value::Array(outputs))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dagforge_core::model::StageResources;
    use dagforge_core::stage::StageKind;
    use dagforge_core::targets::{StageTarget, TargetSignature};

    struct Square;

    #[async_trait]
    impl StageTarget for Square {
        fn signature(&self) -> TargetSignature {
            TargetSignature { params: vec!["x".to_string()], accepts_var_kwargs: false }
        }

        async fn invoke(&self, args: Map<String, Value>, _context: &WorkflowRunContext) -> Result<Value> {
            let x = args.get("x").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(Value::from(x * x))
        }
    }

    fn stage(kind: StageKind) -> Arc<BaseStage> {
        Arc::new(BaseStage {
            kind,
            name: "square".to_string(),
            depends_on: vec![],
            description: String::new(),
            version: String::new(),
            resources: StageResources::default(),
            priority: None,
            map_on: None,
            target: Arc::new(Square),
        })
    }

    fn context() -> WorkflowRunContext {
        WorkflowRunContext::new(uuid::Uuid::now_v7(), "wf", "default", Map::new(), Map::new())
    }

    #[tokio::test]
    async fn lazy_invokes_the_target_with_positional_args_mapped_to_its_signature() {
        let executor = LocalExecutor::new(4, 4.0, 0.0, std::env::temp_dir().join("dagforge-test-local.sock"));
        let result = executor
            .lazy(stage(StageKind::Simple), context(), vec![Value::from(5)], Map::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from(25.0));
    }

    #[tokio::test]
    async fn mapped_lazy_applies_the_target_to_every_item() {
        let executor = LocalExecutor::new(4, 4.0, 0.0, std::env::temp_dir().join("dagforge-test-local-mapped.sock"));
        let items = vec![Value::from(1), Value::from(2), Value::from(3)];
        let result = executor
            .mapped_lazy(stage(StageKind::Parameterized), context(), items, vec![], Map::new())
            .await
            .unwrap();
        assert_eq!(result, Value::Array(vec![Value::from(1.0), Value::from(4.0), Value::from(9.0)]));
    }

    #[test]
    fn check_resources_rejects_demands_above_configured_cpus() {
        let executor = LocalExecutor::new(1, 1.0, 0.0, std::env::temp_dir().join("dagforge-test-local-resources.sock"));
        let demanding = BaseStage {
            kind: StageKind::Simple,
            name: "square".to_string(),
            depends_on: vec![],
            description: String::new(),
            version: String::new(),
            resources: StageResources { cpus: Some(8.0), ..Default::default() },
            priority: None,
            map_on: None,
            target: Arc::new(Square),
        };
        assert!(executor.check_resources(&demanding).is_err());
    }
}
