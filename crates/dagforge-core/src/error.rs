// Shared error taxonomy.

use thiserror::Error;

/// Result type alias used across the workspace's core crates.
pub type Result<T> = std::result::Result<T, DagforgeError>;

/// Errors raised anywhere in the workflow compiler, stage binder, or run
/// orchestration. Each variant corresponds to one row of the error taxonomy
/// table: callers map these to HTTP status codes at the API boundary, never
/// here.
#[derive(Debug, Error)]
pub enum DagforgeError {
    /// Bad input: schema mismatch, duplicate name, malformed definition.
    #[error("validation error: {0}")]
    Validation(String),

    /// No such entity in the resource store.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Duplicate unique field on create.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend rejected a write.
    #[error("write error: {0}")]
    Write(String),

    /// A run failed during execution. Recorded in the run's result, not
    /// propagated to the caller unless the caller asked to wait.
    #[error("workflow execution error: {0}")]
    WorkflowExecution(String),

    /// DAG validation found a cycle.
    #[error("cyclic dependency among stages: {0:?}")]
    CyclicDependency(Vec<String>),

    /// Executor failed to start or close.
    #[error("executor unavailable: {0}")]
    ExecutorUnavailable(String),

    /// Declared resource requirements exceed what any worker can satisfy.
    #[error("insufficient resources: {0}")]
    ResourceExhausted(String),

    /// Broker connectivity was lost.
    #[error("broker error: {0}")]
    Broker(String),

    /// An event payload didn't match the schema a callback expected.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Escape hatch for anything not covered above.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DagforgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::ResourceNotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::WorkflowExecution(msg.into())
    }
}
