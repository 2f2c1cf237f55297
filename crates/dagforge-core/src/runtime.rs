// Top-level run orchestration and the Executor abstraction
// it depends on. Concrete executors (local, distributed) live in
// `dagforge-executor` and implement the `Executor` trait declared here;
// concrete stores/buses implement `RunSink`/`EventPublisher` declared here
// too, which keeps this crate free of any I/O backend dependency.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::context::WorkflowRunContext;
use crate::error::{DagforgeError, Result};
use crate::event::{RunWorkflowEvent, WorkflowFinishedEvent, WorkflowStartedEvent};
use crate::graph::WorkflowGraph;
use crate::model::{RunState, WorkflowResource, WorkflowRun};
use crate::stage::BaseStage;
use crate::targets::TargetRegistry;

/// A handle to a stage's eventual output. Backends return these from
/// `lazy`/`mapped_lazy`; `execute_graph` awaits them level by level (or all
/// at once, per `ExecutionStrategy`).
pub type LazyValue = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// The compute backend that realizes lazy stage references.
/// `start`/`close` must be idempotent per the contract; `close` must be
/// safe to call after a failed `start`.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
    async fn environment_info(&self) -> Value;

    /// Check that every stage's declared resources can be satisfied by at
    /// least one worker; raises `ResourceExhausted` before any submission
    /// happens.
    fn check_resources(&self, stage: &BaseStage) -> Result<()>;

    fn lazy(
        &self,
        stage: Arc<BaseStage>,
        context: WorkflowRunContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> LazyValue;

    fn mapped_lazy(
        &self,
        stage: Arc<BaseStage>,
        context: WorkflowRunContext,
        iterable: Vec<Value>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> LazyValue;
}

/// Group-by-group awaits every lazy value in a level before submitting the
/// next (robust: errors short-circuit before downstream submission).
/// All-at-once binds the whole DAG up front and only awaits the final level
/// (more parallel, can mask per-stage failures until the final await).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    #[default]
    GroupByGroup,
    AllAtOnce,
}

/// Walk a compiled graph level by level, building each stage's partial
/// application and collecting results. Shared by every `Executor`
/// implementation's `call`, so backends only need to implement
/// `lazy`/`mapped_lazy`.
#[instrument(skip_all, fields(workflow = %context.workflow_name, strategy = ?strategy))]
pub async fn execute_graph(
    graph: &WorkflowGraph,
    executor: &dyn Executor,
    context: &WorkflowRunContext,
    strategy: ExecutionStrategy,
) -> Result<Value> {
    let levels = graph.levels()?;
    let mut results: HashMap<String, Value> = HashMap::new();

    for stage_name in graph.stage_names() {
        let stage = graph.get_stage(stage_name).expect("stage_names are keys of the graph");
        executor.check_resources(stage)?;
    }

    match strategy {
        ExecutionStrategy::GroupByGroup => {
            for level in &levels {
                let mut lazies = Vec::with_capacity(level.len());
                for name in level {
                    let stage = graph.get_stage(name).expect("level member must exist");
                    let predecessors: Vec<Value> = stage
                        .depends_on
                        .iter()
                        .map(|dep| results.get(dep).cloned().unwrap_or(Value::Null))
                        .collect();
                    let bound = stage.bind_args(&predecessors, &context.input)?;
                    let lazy = stage.create_lazy(executor, context.clone(), bound)?;
                    lazies.push((name.clone(), lazy));
                }

                for (name, lazy) in lazies {
                    let output = lazy.await?;
                    results.insert(name, output);
                }
            }
        }
        ExecutionStrategy::AllAtOnce => {
            // Bind every level's lazies up front, but only await as each
            // level's inputs become available — note this can
            // mask a failing stage until the overall await of the last
            // level, since nothing downstream observes an error early.
            let mut pending: HashMap<String, LazyValue> = HashMap::new();
            for level in &levels {
                for name in level {
                    let stage = graph.get_stage(name).expect("level member must exist");
                    let predecessors: Vec<Value> = stage
                        .depends_on
                        .iter()
                        .map(|dep| results.get(dep).cloned().unwrap_or(Value::Null))
                        .collect();
                    let bound = stage.bind_args(&predecessors, &context.input)?;
                    let lazy = stage.create_lazy(executor, context.clone(), bound)?;
                    pending.insert(name.clone(), lazy);
                }
                // Resolve this level before binding the next, since binding
                // needs concrete predecessor values — but nothing is
                // awaited until every lazy for the level has been created.
                for name in level {
                    let lazy = pending.remove(name).expect("just inserted");
                    results.insert(name.clone(), lazy.await?);
                }
            }
        }
    }

    let last_level = levels.last().expect("graph has at least one stage");
    if last_level.len() == 1 {
        Ok(results.remove(&last_level[0]).unwrap_or(Value::Null))
    } else {
        Ok(Value::Array(
            last_level
                .iter()
                .map(|name| results.remove(name).unwrap_or(Value::Null))
                .collect(),
        ))
    }
}

/// Where a run's record is kept. Implemented by `dagforge-storage` (and, for
/// tests, a trivial in-memory stand-in).
#[async_trait::async_trait]
pub trait RunSink: Send + Sync {
    async fn persist(&self, run: &WorkflowRun) -> Result<()>;
}

/// Where lifecycle events are published. Implemented by `dagforge-eventbus`.
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_started(&self, event: WorkflowStartedEvent) -> Result<()>;
    async fn publish_finished(&self, event: WorkflowFinishedEvent) -> Result<()>;
}

/// Options threaded through a single `run_workflow` call.
pub struct RunWorkflowOptions {
    pub source: String,
    pub namespace: String,
    pub input: Map<String, Value>,
    pub config_data: Map<String, Value>,
    pub retain: bool,
    pub strategy: ExecutionStrategy,
}

impl Default for RunWorkflowOptions {
    fn default() -> Self {
        Self {
            source: "manual".to_string(),
            namespace: "default".to_string(),
            input: Map::new(),
            config_data: Map::new(),
            retain: true,
            strategy: ExecutionStrategy::default(),
        }
    }
}

/// Run metrics the caller (typically `dagforge-api`'s wiring) feeds to its
/// metrics container. Kept as plain data rather than calling a global
/// meter directly, so this crate doesn't dictate which metrics library the
/// binary uses.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub workflow: String,
    pub namespace: String,
    pub source: String,
    pub duration_ms: f64,
    pub failed: bool,
}

/// Top-level orchestration for a single run.
pub async fn run_workflow(
    definition: &WorkflowResource,
    registry: &TargetRegistry,
    executor: &dyn Executor,
    sink: Option<&dyn RunSink>,
    publisher: &dyn EventPublisher,
    options: RunWorkflowOptions,
) -> Result<(WorkflowRun, RunMetrics)> {
    let graph = WorkflowGraph::compile(definition, registry)?;

    let mut run = WorkflowRun::new(definition.metadata.name.clone(), options.source.clone());
    if options.retain {
        run.state = RunState::Pending;
        if let Some(sink) = sink {
            sink.persist(&run).await?;
        }
    }

    run.state = RunState::Running;
    publisher
        .publish_started(WorkflowStartedEvent { run: run.clone() })
        .await?;

    let context = WorkflowRunContext::new(
        run.uid,
        definition.metadata.name.clone(),
        options.namespace.clone(),
        options.input.clone(),
        options.config_data.clone(),
    );

    let started = Instant::now();
    let outcome = execute_graph(&graph, executor, &context, options.strategy).await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let failed = match outcome {
        Ok(result) => {
            run.set_finished(result, RunState::Finished);
            info!(workflow = %definition.metadata.name, run = %run.uid, "workflow finished");
            false
        }
        Err(err) => {
            let error_value = serde_json::json!({
                "kind": error_kind(&err),
                "message": err.to_string(),
            });
            run.set_finished(error_value, RunState::Failed);
            warn!(workflow = %definition.metadata.name, run = %run.uid, error = %err, "workflow failed");
            true
        }
    };

    if options.retain {
        if let Some(sink) = sink {
            sink.persist(&run).await?;
        }
    }

    publisher
        .publish_finished(WorkflowFinishedEvent { run: run.clone() })
        .await?;

    let metrics = RunMetrics {
        workflow: definition.metadata.name.clone(),
        namespace: options.namespace,
        source: run.source.clone(),
        duration_ms,
        failed,
    };

    Ok((run, metrics))
}

fn error_kind(err: &DagforgeError) -> &'static str {
    match err {
        DagforgeError::Validation(_) => "ValidationError",
        DagforgeError::ResourceNotFound(_) => "ResourceNotFound",
        DagforgeError::Conflict(_) => "Conflict",
        DagforgeError::Write(_) => "WriteError",
        DagforgeError::WorkflowExecution(_) => "WorkflowExecutionError",
        DagforgeError::CyclicDependency(_) => "CyclicDependency",
        DagforgeError::ExecutorUnavailable(_) => "ExecutorUnavailable",
        DagforgeError::ResourceExhausted(_) => "ResourceExhausted",
        DagforgeError::Broker(_) => "BrokerError",
        DagforgeError::SchemaMismatch(_) => "SchemaMismatch",
        DagforgeError::Internal(_) => "InternalError",
    }
}

/// Build a `RunWorkflowEvent` the way the trigger engine's `run_workflow`
/// action does: source is always `"trigger"`.
pub fn trigger_run_event(identifier: impl Into<String>, payload: Value) -> RunWorkflowEvent {
    RunWorkflowEvent {
        identifier: identifier.into(),
        payload,
        namespace: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ResourceMetadata, StageResources, WorkflowSpec, WorkflowStage, WorkflowStageType,
    };
    use crate::targets::{StageTarget, TargetSignature};
    use std::sync::Mutex;

    struct RangeTarget;
    #[async_trait::async_trait]
    impl StageTarget for RangeTarget {
        fn signature(&self) -> TargetSignature {
            TargetSignature {
                params: vec![],
                accepts_var_kwargs: true,
            }
        }
        async fn invoke(&self, _args: Map<String, Value>, _ctx: &WorkflowRunContext) -> Result<Value> {
            Ok(Value::Array((0..10).map(Value::from).collect()))
        }
    }

    struct SquareTarget;
    #[async_trait::async_trait]
    impl StageTarget for SquareTarget {
        fn signature(&self) -> TargetSignature {
            TargetSignature {
                params: vec!["x".to_string()],
                accepts_var_kwargs: false,
            }
        }
        async fn invoke(&self, args: Map<String, Value>, _ctx: &WorkflowRunContext) -> Result<Value> {
            let x = args.get("x").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(Value::from(x * x))
        }
    }

    /// Trivial local-style executor used only to exercise `run_workflow` end
    /// to end without pulling in `dagforge-executor`.
    struct ImmediateExecutor;
    #[async_trait::async_trait]
    impl Executor for ImmediateExecutor {
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        async fn environment_info(&self) -> Value {
            Value::Null
        }
        fn check_resources(&self, _stage: &BaseStage) -> Result<()> {
            Ok(())
        }
        fn lazy(
            &self,
            stage: Arc<BaseStage>,
            context: WorkflowRunContext,
            args: Vec<Value>,
            kwargs: Map<String, Value>,
        ) -> LazyValue {
            Box::pin(async move {
                let mut merged = kwargs;
                if let Some(first) = args.first() {
                    merged.insert("x".to_string(), first.clone());
                }
                stage.target.invoke(merged, &context).await
            })
        }
        fn mapped_lazy(
            &self,
            stage: Arc<BaseStage>,
            context: WorkflowRunContext,
            iterable: Vec<Value>,
            _args: Vec<Value>,
            kwargs: Map<String, Value>,
        ) -> LazyValue {
            Box::pin(async move {
                let mut outputs = Vec::with_capacity(iterable.len());
                for item in iterable {
                    let mut call_args = kwargs.clone();
                    call_args.insert("x".to_string(), item);
                    outputs.push(stage.target.invoke(call_args, &context).await?);
                }
                Ok(Value::Array(outputs))
            })
        }
    }

    struct NullSink(Mutex<Vec<WorkflowRun>>);
    #[async_trait::async_trait]
    impl RunSink for NullSink {
        async fn persist(&self, run: &WorkflowRun) -> Result<()> {
            self.0.lock().unwrap().push(run.clone());
            Ok(())
        }
    }

    struct NullPublisher;
    #[async_trait::async_trait]
    impl EventPublisher for NullPublisher {
        async fn publish_started(&self, _event: WorkflowStartedEvent) -> Result<()> {
            Ok(())
        }
        async fn publish_finished(&self, _event: WorkflowFinishedEvent) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> TargetRegistry {
        let mut r = TargetRegistry::new();
        r.register("range", Arc::new(RangeTarget));
        r.register("square", Arc::new(SquareTarget));
        r
    }

    #[tokio::test]
    async fn simple_chain_squares_a_range() {
        let wf = WorkflowResource {
            doc_id: uuid::Uuid::now_v7(),
            metadata: ResourceMetadata::new("chain"),
            spec: WorkflowSpec {
                stages: vec![
                    WorkflowStage {
                        kind: WorkflowStageType::Simple,
                        target: "range".to_string(),
                        name: "s1".to_string(),
                        description: String::new(),
                        version: String::new(),
                        depends_on: vec![],
                        options: Value::Null,
                        resources: StageResources::default(),
                        priority: None,
                        map_on: None,
                    },
                    WorkflowStage {
                        kind: WorkflowStageType::Parameterized,
                        target: "square".to_string(),
                        name: "s2".to_string(),
                        description: String::new(),
                        version: String::new(),
                        depends_on: vec!["s1".to_string()],
                        options: Value::Null,
                        resources: StageResources::default(),
                        priority: None,
                        map_on: None,
                    },
                ],
            },
        };

        let executor = ImmediateExecutor;
        let sink = NullSink(Mutex::new(Vec::new()));
        let publisher = NullPublisher;

        let (run, metrics) = run_workflow(
            &wf,
            &registry(),
            &executor,
            Some(&sink),
            &publisher,
            RunWorkflowOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(run.state, RunState::Finished);
        assert!(run.finished_at.unwrap() >= run.started_at);
        assert!(!metrics.failed);
        let expected: Vec<Value> = (0..10i64).map(|x| Value::from(x * x)).collect();
        assert_eq!(run.result, Some(Value::Array(expected)));
    }
}
