// Per-run context threaded through every stage invocation.
//
// `WorkflowRunContext` is built once by `run_workflow` and handed to the
// executor, which serializes it across the worker boundary (thread, process,
// or remote) and binds/unbinds it around each target invocation so targets
// can read the current run's identity without threading it through every
// signature.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Everything a stage target needs besides its own arguments: the run's
/// input, the merged config data, and identifying fields used for
/// cluster-memory namespacing and log correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunContext {
    pub run_id: Uuid,
    pub workflow_name: String,
    pub namespace: String,
    pub input: serde_json::Map<String, Value>,
    pub config_data: serde_json::Map<String, Value>,
}

impl WorkflowRunContext {
    pub fn new(
        run_id: Uuid,
        workflow_name: impl Into<String>,
        namespace: impl Into<String>,
        input: serde_json::Map<String, Value>,
        config_data: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            run_id,
            workflow_name: workflow_name.into(),
            namespace: namespace.into(),
            input,
            config_data,
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<WorkflowRunContext>> = const { RefCell::new(None) };
}

/// Bind the context for the current worker thread. Called by the stage
/// execution wrapper right before invoking the target.
pub fn set_run_context(context: WorkflowRunContext) {
    CURRENT.with(|cell| *cell.borrow_mut() = Some(context));
}

/// Unbind the context. Always called on the way out of the stage wrapper,
/// success or failure.
pub fn reset_run_context() {
    CURRENT.with(|cell| *cell.borrow_mut() = None);
}

/// Read the currently bound context, if any. Targets that need it declare a
/// parameter the stage binder fills from here rather than reaching for this
/// directly (see `stage::get_partial`); it's exposed for capabilities that
/// aren't expressed as ordinary stage parameters, such as logging helpers.
pub fn current_run_context() -> Option<WorkflowRunContext> {
    CURRENT.with(|cell| cell.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn context_round_trips_through_thread_local() {
        assert!(current_run_context().is_none());
        let ctx = WorkflowRunContext::new(Uuid::now_v7(), "wf", "default", Map::new(), Map::new());
        set_run_context(ctx.clone());
        assert_eq!(current_run_context().unwrap().workflow_name, "wf");
        reset_run_context();
        assert!(current_run_context().is_none());
    }
}
