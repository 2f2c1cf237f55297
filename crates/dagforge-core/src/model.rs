// Document model shared with the resource store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata block carried by every higher-level `Resource`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMetadata {
    pub uid: Uuid,
    /// Unique within the resource's kind.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl ResourceMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uid: Uuid::now_v7(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            annotations: HashMap::new(),
        }
    }
}

/// Common envelope every document in the store carries: an opaque,
/// immutable `doc_id` plus the kind-specific metadata and spec.
pub trait Resource {
    /// `"workflow"`, `"config"`, `"trigger_rule"`, or a run's implicit kind.
    fn kind(&self) -> &'static str;
    fn metadata(&self) -> &ResourceMetadata;
    fn metadata_mut(&mut self) -> &mut ResourceMetadata;
}

/// Per-stage resource declaration. Extras are logical labels beyond the
/// well-known `cpus`/`gpus`/`memory` fields (e.g. `{"tpus": 1.0}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<f64>,
    /// Bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    #[serde(flatten)]
    pub extras: HashMap<String, f64>,
}

impl StageResources {
    /// Flatten into the `{resource_name: amount}` map the executor's
    /// resource-exhaustion check consumes, omitting unset fields.
    pub fn required(&self) -> HashMap<String, f64> {
        let mut out = self.extras.clone();
        if let Some(cpus) = self.cpus {
            out.insert("cpus".to_string(), cpus);
        }
        if let Some(gpus) = self.gpus {
            out.insert("gpus".to_string(), gpus);
        }
        if let Some(memory) = self.memory {
            out.insert("memory".to_string(), memory);
        }
        out
    }
}

/// The `type` discriminant of a `WorkflowStage` definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStageType {
    Simple,
    Parameterized,
}

/// A single stage definition inside a `WorkflowResource`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStage {
    #[serde(rename = "type")]
    pub kind: WorkflowStageType,
    /// Canonical name in the target registry, replacing a raw
    /// dotted-path callable reference.
    pub target: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Content/schema fingerprint of the target.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub resources: StageResources,
    #[serde(default)]
    pub priority: Option<i32>,
    /// Only meaningful for `Parameterized` stages: the input field to map
    /// over when this is a first stage (no dependencies).
    #[serde(default)]
    pub map_on: Option<String>,
}

/// `spec` of a `WorkflowResource`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSpec {
    pub stages: Vec<WorkflowStage>,
}

/// `kind = "workflow"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowResource {
    pub doc_id: Uuid,
    pub metadata: ResourceMetadata,
    pub spec: WorkflowSpec,
}

impl Resource for WorkflowResource {
    fn kind(&self) -> &'static str {
        "workflow"
    }
    fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ResourceMetadata {
        &mut self.metadata
    }
}

/// How a `ConfigResource` is joined to a target resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigSelector {
    Name { value: String, kind: Option<String> },
    Annotation {
        value: HashMap<String, String>,
        kind: Option<String>,
    },
}

/// `kind = "config"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigResource {
    pub doc_id: Uuid,
    pub metadata: ResourceMetadata,
    pub spec: ConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigSpec {
    #[serde(default)]
    pub selector: Option<ConfigSelector>,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

impl Resource for ConfigResource {
    fn kind(&self) -> &'static str {
        "config"
    }
    fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ResourceMetadata {
        &mut self.metadata
    }
}

/// `kind = "trigger_rule"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerRuleResource {
    pub doc_id: Uuid,
    pub metadata: ResourceMetadata,
    pub spec: TriggerRuleSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", content = "rule")]
pub enum TriggerRule {
    Condition(Value),
    Schedule(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerAction {
    pub target: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerRuleSpec {
    #[serde(flatten)]
    pub rule: TriggerRule,
    pub action: TriggerAction,
}

impl Resource for TriggerRuleResource {
    fn kind(&self) -> &'static str {
        "trigger_rule"
    }
    fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ResourceMetadata {
        &mut self.metadata
    }
}

/// Lifecycle state of a `WorkflowRun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Finished,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finished | RunState::Failed)
    }
}

/// A single execution of a workflow. `name`, `workflow`, `source`, and
/// `started_at` are immutable after creation (enforced by the
/// resource store's immutability walk, not by Rust field privacy, since the
/// store has to merge partial patches coming off the wire).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRun {
    pub doc_id: Uuid,
    pub uid: Uuid,
    pub name: String,
    pub workflow: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<Value>,
    pub state: RunState,
}

impl WorkflowRun {
    pub fn new(workflow: impl Into<String>, source: impl Into<String>) -> Self {
        let uid = Uuid::now_v7();
        Self {
            doc_id: Uuid::now_v7(),
            uid,
            name: format!("{}-{}", "run", uid.simple()),
            workflow: workflow.into(),
            source: source.into(),
            started_at: Utc::now(),
            finished_at: None,
            result: None,
            state: RunState::Pending,
        }
    }

    /// Transition to a terminal state, recording the result/error and the
    /// finish time. Idempotent in the sense that calling it twice simply
    /// overwrites the terminal fields — the runtime only ever calls this
    /// once per run.
    pub fn set_finished(&mut self, result: Value, state: RunState) {
        debug_assert!(state.is_terminal());
        self.result = Some(result);
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_resources_omit_unset_fields() {
        let resources = StageResources {
            cpus: Some(2.0),
            gpus: None,
            memory: None,
            extras: HashMap::from([("tpus".to_string(), 1.0)]),
        };
        let required = resources.required();
        assert_eq!(required.get("cpus"), Some(&2.0));
        assert!(!required.contains_key("gpus"));
        assert_eq!(required.get("tpus"), Some(&1.0));
    }

    #[test]
    fn run_finishes_into_terminal_state() {
        let mut run = WorkflowRun::new("wf", "manual");
        assert_eq!(run.state, RunState::Pending);
        run.set_finished(Value::Null, RunState::Finished);
        assert!(run.state.is_terminal());
        assert!(run.finished_at.unwrap() >= run.started_at);
    }
}
