// Stage abstraction: binds a target to arguments and produces a
// lazy value through whichever `Executor` is configured.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::context::WorkflowRunContext;
use crate::error::{DagforgeError, Result};
use crate::model::{StageResources, WorkflowStage, WorkflowStageType};
use crate::runtime::{Executor, LazyValue};
use crate::targets::{StageTarget, TargetRegistry};

/// The `type` discriminant of a compiled stage, mirroring
/// `WorkflowStageType` but attached to the resolved `BaseStage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Simple,
    Parameterized,
}

/// A compiled, resolvable stage: a `WorkflowStage` definition with its
/// target handle looked up in the registry.
#[derive(Debug)]
pub struct BaseStage {
    pub kind: StageKind,
    pub name: String,
    pub depends_on: Vec<String>,
    pub description: String,
    pub version: String,
    pub resources: StageResources,
    pub priority: Option<i32>,
    pub map_on: Option<String>,
    pub target: Arc<dyn StageTarget>,
}

impl BaseStage {
    /// Resolve a `WorkflowStage` definition against the target registry.
    /// Fails with `Validation` if the target name isn't registered — this is
    /// the statically-typed replacement for a dotted-path lookup.
    pub fn from_definition(definition: &WorkflowStage, registry: &TargetRegistry) -> Result<Self> {
        let target = registry.get(&definition.target)?;

        const INTERNAL_PARAMS: &[&str] = &["context"];
        let signature = target.signature();
        if signature
            .params
            .iter()
            .any(|p| INTERNAL_PARAMS.contains(&p.as_str()))
        {
            return Err(DagforgeError::validation(format!(
                "stage `{}` target cannot declare a parameter named `context`",
                definition.name
            )));
        }

        let kind = match definition.kind {
            WorkflowStageType::Simple => StageKind::Simple,
            WorkflowStageType::Parameterized => StageKind::Parameterized,
        };

        Ok(Self {
            kind,
            name: definition.name.clone(),
            depends_on: definition.depends_on.clone(),
            description: definition.description.clone(),
            version: definition.version.clone(),
            resources: definition.resources.clone(),
            priority: definition.priority,
            map_on: definition.map_on.clone(),
            target,
        })
    }

    pub fn is_async(&self) -> bool {
        self.target.is_async()
    }

    pub fn get_required_resources(&self) -> std::collections::HashMap<String, f64> {
        self.resources.required()
    }

    /// Bind inputs for this stage:
    /// - a stage with dependencies receives its predecessors' outputs as
    ///   positional args, in `depends_on` order; passing kwargs at the same
    ///   time is an error.
    /// - a stage with no dependencies receives the run's input mapping as
    ///   kwargs.
    /// - a parameterized stage with no dependencies (the first stage in a
    ///   map) instead takes `run_input[map_on]` as its sole positional arg,
    ///   the iterable `create_lazy` maps over; that key is withheld from
    ///   kwargs so it isn't also bound as a target parameter.
    /// - filtered down to the target's declared parameters unless the target
    ///   accepts a var-keyword bag.
    /// - `context` is always threaded through separately, never as a
    ///   filtered kwarg.
    pub fn bind_args(
        &self,
        predecessor_outputs: &[Value],
        run_input: &Map<String, Value>,
    ) -> Result<BoundArgs> {
        if !self.depends_on.is_empty() {
            if predecessor_outputs.len() != self.depends_on.len() {
                return Err(DagforgeError::validation(format!(
                    "stage `{}` expected {} predecessor outputs, got {}",
                    self.name,
                    self.depends_on.len(),
                    predecessor_outputs.len()
                )));
            }
            // A dependent stage's positional args come exclusively from its
            // predecessors; run input never leaks in as kwargs alongside them.
            return Ok(BoundArgs {
                args: predecessor_outputs.to_vec(),
                kwargs: Map::new(),
            });
        }

        let signature = self.target.signature();
        let mut kwargs = if signature.accepts_var_kwargs {
            run_input.clone()
        } else {
            run_input
                .iter()
                .filter(|(k, _)| signature.params.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let args = if let Some(map_on) = &self.map_on {
            let iterable = run_input.get(map_on).cloned().ok_or_else(|| {
                DagforgeError::validation(format!(
                    "stage `{}` has map_on `{map_on}` but run input has no such key",
                    self.name
                ))
            })?;
            kwargs.remove(map_on);
            vec![iterable]
        } else {
            Vec::new()
        };

        Ok(BoundArgs { args, kwargs })
    }

    /// Dispatch to the executor: `simple` stages realize a single
    /// lazy value; `parameterized` stages realize a lazy value over the
    /// first positional argument (the iterable to map).
    pub fn create_lazy(
        self: &Arc<Self>,
        executor: &dyn Executor,
        context: WorkflowRunContext,
        bound: BoundArgs,
    ) -> Result<LazyValue> {
        match self.kind {
            StageKind::Simple => Ok(executor.lazy(self.clone(), context, bound.args, bound.kwargs)),
            StageKind::Parameterized => {
                let mut args = bound.args;
                if args.is_empty() {
                    return Err(DagforgeError::validation(format!(
                        "parameterized stage `{}` needs an iterable to map over",
                        self.name
                    )));
                }
                let iterable = args.remove(0);
                let items = match iterable {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                Ok(executor.mapped_lazy(self.clone(), context, items, args, bound.kwargs))
            }
        }
    }
}

/// Result of `BaseStage::bind_args`: positional args (from predecessors) and
/// keyword args (from run input), ready for `create_lazy`.
#[derive(Debug)]
pub struct BoundArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::TargetSignature;

    struct Double;

    #[async_trait::async_trait]
    impl StageTarget for Double {
        fn signature(&self) -> TargetSignature {
            TargetSignature {
                params: vec!["x".to_string()],
                accepts_var_kwargs: false,
            }
        }

        async fn invoke(&self, args: Map<String, Value>, _context: &WorkflowRunContext) -> Result<Value> {
            let x = args.get("x").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(Value::from(x * x))
        }
    }

    fn stage(depends_on: Vec<String>) -> BaseStage {
        BaseStage {
            kind: StageKind::Simple,
            name: "s".to_string(),
            depends_on,
            description: String::new(),
            version: String::new(),
            resources: StageResources::default(),
            priority: None,
            map_on: None,
            target: Arc::new(Double),
        }
    }

    fn parameterized_stage(map_on: &str) -> BaseStage {
        BaseStage {
            kind: StageKind::Parameterized,
            map_on: Some(map_on.to_string()),
            ..stage(vec![])
        }
    }

    #[test]
    fn no_dependency_stage_gets_input_as_kwargs() {
        let s = stage(vec![]);
        let mut input = Map::new();
        input.insert("x".to_string(), Value::from(3));
        let bound = s.bind_args(&[], &input).unwrap();
        assert!(bound.args.is_empty());
        assert_eq!(bound.kwargs.get("x"), Some(&Value::from(3)));
    }

    #[test]
    fn dependent_stage_gets_predecessor_outputs_as_args() {
        let s = stage(vec!["prev".to_string()]);
        let bound = s.bind_args(&[Value::from(9)], &Map::new()).unwrap();
        assert_eq!(bound.args, vec![Value::from(9)]);
        assert!(bound.kwargs.is_empty());
    }

    #[test]
    fn first_parameterized_stage_maps_over_input_map_on_key() {
        let s = parameterized_stage("x");
        let mut input = Map::new();
        input.insert("x".to_string(), Value::from(vec![1, 2, 3]));
        let bound = s.bind_args(&[], &input).unwrap();
        assert_eq!(bound.args, vec![Value::from(vec![1, 2, 3])]);
        assert!(!bound.kwargs.contains_key("x"));
    }

    #[test]
    fn map_on_key_missing_from_input_is_a_validation_error() {
        let s = parameterized_stage("missing");
        let err = s.bind_args(&[], &Map::new()).unwrap_err();
        assert!(matches!(err, DagforgeError::Validation(_)));
    }
}
