// Static target registry: replaces dotted-path import-by-string with a
// registry built at process startup mapping canonical names to strongly
// typed handles.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::WorkflowRunContext;
use crate::error::{DagforgeError, Result};

/// A target's declared call signature: parameter names (for filtering
/// args/kwargs) and whether it accepts a var-keyword bag.
#[derive(Debug, Clone, Default)]
pub struct TargetSignature {
    pub params: Vec<String>,
    pub accepts_var_kwargs: bool,
}

/// A registered, strongly typed callable a `WorkflowStage` can reference by
/// name. Implementations close over whatever async function the operator
/// wants to expose; the registry only needs to know its declared parameters
/// and how to invoke it given a JSON object of bound arguments.
#[async_trait::async_trait]
pub trait StageTarget: Send + Sync + std::fmt::Debug {
    fn signature(&self) -> TargetSignature;
    fn is_async(&self) -> bool {
        true
    }
    async fn invoke(&self, args: serde_json::Map<String, Value>, context: &WorkflowRunContext) -> Result<Value>;
}

/// Maps canonical target names to their `StageTarget` handle. Workflow
/// definitions reference targets by name; compiling a workflow whose target
/// name is unknown fails at submission.
#[derive(Clone, Default)]
pub struct TargetRegistry {
    targets: HashMap<String, Arc<dyn StageTarget>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, target: Arc<dyn StageTarget>) {
        self.targets.insert(name.into(), target);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn StageTarget>> {
        self.targets
            .get(name)
            .cloned()
            .ok_or_else(|| DagforgeError::validation(format!("unknown stage target: {name}")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }
}
