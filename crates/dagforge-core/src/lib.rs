// Workflow orchestration core.
//
// This crate owns the pieces a reimplementation of the orchestration server
// needs before any I/O backend is chosen:
// - the document model shared by the resource store (`model`)
// - the DAG compiler that turns a WorkflowResource into executable levels
//   (`graph`)
// - the Stage abstraction that binds a target to arguments and produces a
//   lazy value for whichever executor is configured (`stage`)
// - the per-run context threaded through stage invocations (`context`)
// - the top-level `run_workflow` orchestration (`runtime`)
// - process-wide configuration and the shared error taxonomy (`config`,
//   `error`)
//
// Nothing here talks to Postgres, a broker, or a worker pool directly —
// those are trait objects (`Executor`, `EventPublisher`, `ResourceStorage`)
// provided by the crates that do.

pub mod config;
pub mod config_join;
pub mod context;
pub mod error;
pub mod event;
pub mod graph;
pub mod model;
pub mod runtime;
pub mod stage;
pub mod targets;

pub use config::Configuration;
pub use context::WorkflowRunContext;
pub use error::{DagforgeError, Result};
pub use event::{Event, RunWorkflowEvent, WorkflowFinishedEvent, WorkflowStartedEvent};
pub use graph::WorkflowGraph;
pub use model::{
    ConfigResource, Resource, ResourceMetadata, StageResources, TriggerRuleResource,
    WorkflowResource, WorkflowRun, WorkflowStage,
};
pub use runtime::{
    run_workflow, EventPublisher, Executor, ExecutionStrategy, LazyValue, RunMetrics, RunSink,
    RunWorkflowOptions,
};
pub use stage::{BaseStage, StageKind};
pub use targets::{StageTarget, TargetRegistry};
