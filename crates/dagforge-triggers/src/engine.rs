// Two independent firing paths sharing one action dispatcher: condition
// triggers evaluate against every event on the bus; schedule triggers tick
// on a background timer and walk their cron strings.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, TimeZone, Utc};
use dagforge_core::error::Result;
use dagforge_core::event::RunWorkflowEvent;
use dagforge_core::model::{TriggerAction, TriggerRule, TriggerRuleResource};
use dagforge_eventbus::{EventBus, EventCallback, StreamItem, ALL};
use serde_json::Value;
use uuid::Uuid;

use crate::condition;
use crate::cron;

/// Where trigger rule definitions live. Implemented by `dagforge-storage`;
/// kept as a trait here so this crate never depends on a storage backend
/// directly.
#[async_trait::async_trait]
pub trait TriggerRuleStore: Send + Sync {
    async fn list_condition_triggers(&self) -> Result<Vec<TriggerRuleResource>>;
    async fn list_schedule_triggers(&self) -> Result<Vec<TriggerRuleResource>>;
    async fn mark_ran(&self, uid: Uuid, at: DateTime<Utc>) -> Result<()>;
}

const LAST_RUN_ANNOTATION: &str = "last_run";

fn last_run_of(rule: &TriggerRuleResource) -> DateTime<Utc> {
    rule.metadata
        .annotations
        .get(LAST_RUN_ANNOTATION)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is representable"))
}

/// Dispatch a fired trigger's action. `run_workflow` is the only built-in
/// action; it publishes a `RunWorkflowEvent` for the workflow runtime to
/// pick up. Other action names are logged and skipped rather than failing
/// the whole tick/dispatch.
async fn dispatch_action(bus: &EventBus, action: &TriggerAction, source: &str) -> Result<()> {
    match action.target.as_str() {
        "run_workflow" => {
            let identifier = action
                .parameters
                .get("workflow")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let payload = action.parameters.get("payload").cloned().unwrap_or(Value::Null);
            let namespace = action
                .parameters
                .get("namespace")
                .and_then(Value::as_str)
                .map(str::to_string);
            let event = RunWorkflowEvent { identifier, payload, namespace }.into_event(source);
            bus.publish(&event.channel.clone(), event).await
        }
        other => {
            tracing::warn!(action = other, "unknown trigger action, skipping");
            Ok(())
        }
    }
}

/// Owns the condition-callback registration and the schedule tick loop.
/// Cloning shares the same underlying state (store, bus, tick tasks).
pub struct TriggerEngine {
    bus: Arc<EventBus>,
    store: Arc<dyn TriggerRuleStore>,
    tick_interval: StdDuration,
    source: String,
    last_checked_epoch_millis: Arc<AtomicI64>,
    schedule_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TriggerEngine {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn TriggerRuleStore>, tick_interval: StdDuration, source: impl Into<String>) -> Self {
        Self {
            bus,
            store,
            tick_interval,
            source: source.into(),
            last_checked_epoch_millis: Arc::new(AtomicI64::new(0)),
            schedule_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Register the `$ALL/$ALL` condition callback and spawn the schedule
    /// tick loop. Call once at service startup.
    pub async fn start(self: &Arc<Self>) {
        let engine = self.clone();
        self.bus.add_callback(EventCallback::new(
            ALL,
            ALL,
            Arc::new(move |event| {
                let engine = engine.clone();
                Box::pin(async move {
                    if let Err(err) = engine.evaluate_condition_triggers(&event.data).await {
                        tracing::warn!(error = %err, "condition trigger evaluation failed");
                    }
                })
            }),
        ));

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.tick_interval);
            loop {
                interval.tick().await;
                if let Err(err) = engine.tick_schedule_triggers().await {
                    tracing::warn!(error = %err, "schedule tick failed");
                }
            }
        });
        *self.schedule_handle.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.schedule_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn evaluate_condition_triggers(&self, event_data: &Value) -> Result<()> {
        let triggers = self.store.list_condition_triggers().await?;
        for trigger in triggers {
            let TriggerRule::Condition(rule) = &trigger.spec.rule else { continue };
            let matched = condition::evaluate(rule, event_data);
            if matches!(matched, Value::Bool(true)) {
                self.store.mark_ran(trigger.metadata.uid, Utc::now()).await?;
                dispatch_action(&self.bus, &trigger.spec.action, &self.source).await?;
            }
        }
        Ok(())
    }

    async fn tick_schedule_triggers(&self) -> Result<()> {
        let now = Utc::now();
        let last_checked = Utc
            .timestamp_millis_opt(self.last_checked_epoch_millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or(now);

        let triggers = self.store.list_schedule_triggers().await?;
        let mut any_ran = false;

        for trigger in triggers {
            let TriggerRule::Schedule(cron_expressions) = &trigger.spec.rule else { continue };
            let last_run = last_run_of(&trigger);
            if cron::is_ready_to_run(cron_expressions, last_checked, last_run, now)? {
                self.store.mark_ran(trigger.metadata.uid, now).await?;
                dispatch_action(&self.bus, &trigger.spec.action, &self.source).await?;
                any_ran = true;
            }
        }

        if any_ran {
            self.last_checked_epoch_millis.store(now.timestamp_millis(), Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagforge_core::model::{ResourceMetadata, TriggerRuleSpec};
    use dagforge_eventbus::MemoryBroker;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeStore {
        conditions: Mutex<Vec<TriggerRuleResource>>,
        schedules: Mutex<Vec<TriggerRuleResource>>,
        ran: Mutex<Vec<Uuid>>,
    }

    #[async_trait::async_trait]
    impl TriggerRuleStore for FakeStore {
        async fn list_condition_triggers(&self) -> Result<Vec<TriggerRuleResource>> {
            Ok(self.conditions.lock().clone())
        }
        async fn list_schedule_triggers(&self) -> Result<Vec<TriggerRuleResource>> {
            Ok(self.schedules.lock().clone())
        }
        async fn mark_ran(&self, uid: Uuid, at: DateTime<Utc>) -> Result<()> {
            self.ran.lock().push(uid);
            for rule in self.conditions.lock().iter_mut().chain(self.schedules.lock().iter_mut()) {
                if rule.metadata.uid == uid {
                    rule.metadata.annotations.insert(LAST_RUN_ANNOTATION.to_string(), at.to_rfc3339());
                }
            }
            Ok(())
        }
    }

    fn condition_trigger(rule: Value, workflow: &str) -> TriggerRuleResource {
        TriggerRuleResource {
            doc_id: Uuid::now_v7(),
            metadata: ResourceMetadata::new("on-ready"),
            spec: TriggerRuleSpec {
                rule: TriggerRule::Condition(rule),
                action: TriggerAction {
                    target: "run_workflow".to_string(),
                    parameters: serde_json::Map::from_iter([("workflow".to_string(), json!(workflow))]),
                },
            },
        }
    }

    #[tokio::test]
    async fn condition_trigger_fires_run_workflow_on_match() {
        let broker: Arc<dyn dagforge_eventbus::Broker> = Arc::new(MemoryBroker::new());
        let bus = Arc::new(EventBus::new(broker, "trigger-test"));
        bus.connect().await.unwrap();

        let mut sub = bus.subscribe("workflows");
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let store: Arc<dyn TriggerRuleStore> = Arc::new(FakeStore {
            conditions: Mutex::new(vec![condition_trigger(
                json!({"eq": [{"var": "ready"}, true]}),
                "downstream-workflow",
            )]),
            schedules: Mutex::new(vec![]),
            ran: Mutex::new(vec![]),
        });

        let engine = Arc::new(TriggerEngine::new(bus.clone(), store, StdDuration::from_secs(3600), "trigger-test"));
        engine.start().await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        bus.publish(
            "some-channel",
            dagforge_core::event::Event::new("some-channel", "Anything", "test", json!({"ready": true})),
        )
        .await
        .unwrap();

        let item = tokio::time::timeout(StdDuration::from_secs(1), sub.recv()).await.unwrap();
        assert!(matches!(item, Some(StreamItem::Event(ref e)) if e.event_type == "RunWorkflowEvent"));

        engine.stop().await;
    }
}
