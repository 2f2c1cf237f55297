//! Typed event bus: a `Broker` abstraction (in-memory or AMQP), bounded
//! per-subscriber streams, callback dispatch, and request/response built on
//! correlation ids.

pub mod broker;
pub mod bus;
pub mod callback;
pub mod stream;

pub use broker::{Broker, MemoryBroker};
#[cfg(feature = "amqp")]
pub use broker::AmqpBroker;
pub use bus::{EventBus, Subscription};
pub use callback::{CallbackFn, CallbackGroup, EventCallback, ALL};
pub use stream::{matches_schema, EventStream, EventStreamSender, StreamItem};

use std::sync::Arc;

use dagforge_core::error::Result;
use dagforge_core::event::{WorkflowFinishedEvent, WorkflowStartedEvent};
use dagforge_core::runtime::EventPublisher;

/// Adapts an `EventBus` to `dagforge_core::EventPublisher` so `run_workflow`
/// can publish lifecycle events without depending on the bus directly.
pub struct BusEventPublisher {
    bus: Arc<EventBus>,
    source: String,
}

impl BusEventPublisher {
    pub fn new(bus: Arc<EventBus>, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }
}

#[async_trait::async_trait]
impl EventPublisher for BusEventPublisher {
    async fn publish_started(&self, event: WorkflowStartedEvent) -> Result<()> {
        let channel = dagforge_core::event::WORKFLOWS_CHANNEL.to_string();
        self.bus.publish(&channel, event.into_event(self.source.clone())).await
    }

    async fn publish_finished(&self, event: WorkflowFinishedEvent) -> Result<()> {
        let channel = dagforge_core::event::WORKFLOWS_CHANNEL.to_string();
        self.bus.publish(&channel, event.into_event(self.source.clone())).await
    }
}

/// Build a bus from configuration: `memory` (default) or `amqp` naming the
/// broker backend, matching `Configuration::event_bus_broker`.
pub fn broker_from_name(name: &str, broker_url: Option<&str>) -> Result<Arc<dyn Broker>> {
    match name {
        "memory" => Ok(Arc::new(MemoryBroker::new())),
        #[cfg(feature = "amqp")]
        "amqp" => {
            let url = broker_url.ok_or_else(|| {
                dagforge_core::error::DagforgeError::validation("amqp broker requires a broker_url")
            })?;
            Ok(AmqpBroker::new(url))
        }
        other => Err(dagforge_core::error::DagforgeError::validation(format!(
            "unknown event bus broker '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_broker_is_always_available() {
        assert!(broker_from_name("memory", None).is_ok());
    }

    #[test]
    fn unknown_broker_name_is_a_validation_error() {
        assert!(broker_from_name("carrier-pigeon", None).is_err());
    }
}
