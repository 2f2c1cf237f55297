// Event bus payload types. The bus itself lives in
// `dagforge-eventbus`; this crate only owns the shapes so that the
// workflow runtime and the trigger engine can agree on them without either
// depending on the bus's transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::WorkflowRun;

/// The untyped envelope carried by the broker. Typed events (below) are
/// views over the same shape with `channel`/`type` fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub channel: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub reply_channel: Option<String>,
    #[serde(default)]
    pub trace_parent: Option<String>,
}

impl Event {
    pub fn new(channel: impl Into<String>, event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            time: Utc::now(),
            channel: channel.into(),
            event_type: event_type.into(),
            source: source.into(),
            data,
            headers: HashMap::new(),
            correlation_id: None,
            reply_channel: None,
            trace_parent: None,
        }
    }
}

pub const WORKFLOWS_CHANNEL: &str = "workflows";

/// Published when a run enters `running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStartedEvent {
    pub run: WorkflowRun,
}

impl WorkflowStartedEvent {
    pub fn into_event(self, source: impl Into<String>) -> Event {
        Event::new(
            WORKFLOWS_CHANNEL,
            "WorkflowStartedEvent",
            source,
            serde_json::to_value(&self).expect("WorkflowStartedEvent is always serializable"),
        )
    }
}

/// Published when a run reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFinishedEvent {
    pub run: WorkflowRun,
}

impl WorkflowFinishedEvent {
    pub fn into_event(self, source: impl Into<String>) -> Event {
        Event::new(
            WORKFLOWS_CHANNEL,
            "WorkflowFinishedEvent",
            source,
            serde_json::to_value(&self).expect("WorkflowFinishedEvent is always serializable"),
        )
    }
}

/// Published by the trigger engine (and the `/run` handler) to ask the
/// workflow runtime to start a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunWorkflowEvent {
    pub identifier: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl RunWorkflowEvent {
    pub fn into_event(self, source: impl Into<String>) -> Event {
        Event::new(
            WORKFLOWS_CHANNEL,
            "RunWorkflowEvent",
            source,
            serde_json::to_value(&self).expect("RunWorkflowEvent is always serializable"),
        )
    }
}

/// Published by `publish_response` on a request's `reply_channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub data: Value,
}
