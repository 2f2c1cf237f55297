// DAG compiler: turns a WorkflowResource into level-scheduled
// execution groups via level-synchronized topological sort.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{DagforgeError, Result};
use crate::model::WorkflowResource;
use crate::stage::BaseStage;
use crate::targets::TargetRegistry;

/// A compiled workflow: every stage resolved against the target registry,
/// plus the dependency edges needed to iterate in level order.
#[derive(Debug)]
pub struct WorkflowGraph {
    stages: HashMap<String, Arc<BaseStage>>,
    /// Insertion order, preserved so level emission within a level and
    /// cycle-detection order are both deterministic.
    order: Vec<String>,
}

impl WorkflowGraph {
    pub fn compile(workflow: &WorkflowResource, registry: &TargetRegistry) -> Result<Self> {
        if workflow.spec.stages.is_empty() {
            return Err(DagforgeError::validation(
                "workflow must declare at least one stage",
            ));
        }

        let mut stages = HashMap::new();
        let mut order = Vec::new();
        let mut seen_names = HashSet::new();

        for definition in &workflow.spec.stages {
            if !seen_names.insert(definition.name.clone()) {
                return Err(DagforgeError::validation(format!(
                    "duplicate stage name `{}`",
                    definition.name
                )));
            }
            let stage = BaseStage::from_definition(definition, registry)?;
            order.push(stage.name.clone());
            stages.insert(stage.name.clone(), Arc::new(stage));
        }

        for stage in stages.values() {
            for dep in &stage.depends_on {
                if !stages.contains_key(dep) {
                    return Err(DagforgeError::validation(format!(
                        "stage `{}` depends on unknown stage `{}`",
                        stage.name, dep
                    )));
                }
            }
        }

        let graph = Self { stages, order };
        // Validate acyclicity eagerly so `CyclicDependency` surfaces at
        // compile time (spec: "no run is created" on a cycle), not lazily
        // the first time someone iterates levels.
        graph.levels()?;
        Ok(graph)
    }

    pub fn get_stage(&self, name: &str) -> Option<&Arc<BaseStage>> {
        self.stages.get(name)
    }

    pub fn stage_names(&self) -> &[String] {
        &self.order
    }

    /// Compute the level partition: at each step, emit every stage whose
    /// dependencies have all been emitted in an earlier level, in insertion
    /// order. If stages remain with no emittable node, the remainder forms a
    /// cycle.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: HashSet<&str> = self.stages.keys().map(String::as_str).collect();
        let mut satisfied: HashSet<&str> = HashSet::new();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let mut ready: Vec<String> = Vec::new();
            for name in &self.order {
                if !remaining.contains(name.as_str()) {
                    continue;
                }
                let stage = &self.stages[name];
                if stage.depends_on.iter().all(|d| satisfied.contains(d.as_str())) {
                    ready.push(name.clone());
                }
            }

            if ready.is_empty() {
                let mut cyclic: Vec<String> = remaining.iter().map(|s| s.to_string()).collect();
                cyclic.sort();
                return Err(DagforgeError::CyclicDependency(cyclic));
            }

            for name in &ready {
                remaining.remove(name.as_str());
                satisfied.insert(self.stages[name].name.as_str());
            }
            levels.push(ready);
        }

        Ok(levels)
    }

    /// Iterate levels as an owned queue, for callers that want to `pop_front`
    /// as they execute each level (the executor's level-walking loop).
    pub fn level_queue(&self) -> Result<VecDeque<Vec<String>>> {
        Ok(self.levels()?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowRunContext;
    use crate::model::{
        ResourceMetadata, StageResources, WorkflowSpec, WorkflowStage, WorkflowStageType,
    };
    use crate::targets::{StageTarget, TargetSignature};
    use serde_json::{Map, Value};
    use std::sync::Arc;

    struct Noop;

    #[async_trait::async_trait]
    impl StageTarget for Noop {
        fn signature(&self) -> TargetSignature {
            TargetSignature::default()
        }
        async fn invoke(&self, _args: Map<String, Value>, _ctx: &WorkflowRunContext) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn registry() -> TargetRegistry {
        let mut r = TargetRegistry::new();
        r.register("noop", Arc::new(Noop));
        r
    }

    fn def(name: &str, depends_on: Vec<&str>) -> WorkflowStage {
        WorkflowStage {
            kind: WorkflowStageType::Simple,
            target: "noop".to_string(),
            name: name.to_string(),
            description: String::new(),
            version: String::new(),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            options: Value::Null,
            resources: StageResources::default(),
            priority: None,
            map_on: None,
        }
    }

    fn workflow(stages: Vec<WorkflowStage>) -> WorkflowResource {
        WorkflowResource {
            doc_id: uuid::Uuid::now_v7(),
            metadata: ResourceMetadata::new("wf"),
            spec: WorkflowSpec { stages },
        }
    }

    #[test]
    fn levels_partition_a_diamond() {
        let wf = workflow(vec![
            def("a", vec![]),
            def("b", vec!["a"]),
            def("c", vec!["a"]),
            def("d", vec!["b", "c"]),
        ]);
        let graph = WorkflowGraph::compile(&wf, &registry()).unwrap();
        let levels = graph.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["a"]);
        assert_eq!(levels[2], vec!["d"]);
        let mut level1 = levels[1].clone();
        level1.sort();
        assert_eq!(level1, vec!["b", "c"]);
    }

    #[test]
    fn cycle_is_rejected_at_compile_time() {
        let wf = workflow(vec![def("a", vec!["b"]), def("b", vec!["a"])]);
        let err = WorkflowGraph::compile(&wf, &registry()).unwrap_err();
        assert!(matches!(err, DagforgeError::CyclicDependency(_)));
    }

    #[test]
    fn unknown_target_fails_compilation() {
        let wf = workflow(vec![WorkflowStage {
            target: "missing".to_string(),
            ..def("a", vec![])
        }]);
        let err = WorkflowGraph::compile(&wf, &registry()).unwrap_err();
        assert!(matches!(err, DagforgeError::Validation(_)));
    }

    #[test]
    fn empty_workflow_is_rejected() {
        let wf = workflow(vec![]);
        let err = WorkflowGraph::compile(&wf, &registry()).unwrap_err();
        assert!(matches!(err, DagforgeError::Validation(_)));
    }
}
