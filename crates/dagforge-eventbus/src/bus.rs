// EventBus: owns a Broker, fans every inbound event out to per-channel
// streams and registered callbacks, and layers request/response on top of
// plain publish/subscribe via `correlation_id`/`reply_channel`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dagforge_core::error::{DagforgeError, Result};
use dagforge_core::event::{Event, ResponseEvent};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

use crate::broker::Broker;
use crate::callback::{CallbackGroup, EventCallback};
use crate::stream::{EventStream, EventStreamSender};

const DEFAULT_STREAM_CAPACITY: usize = 256;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct BusState {
    callbacks: CallbackGroup,
    streams: Vec<(String, EventStreamSender)>,
    subscriber_counts: std::collections::HashMap<String, usize>,
    waiters: std::collections::HashMap<String, oneshot::Sender<Event>>,
}

impl BusState {
    fn new() -> Self {
        Self {
            callbacks: CallbackGroup::new(),
            streams: Vec::new(),
            subscriber_counts: std::collections::HashMap::new(),
            waiters: std::collections::HashMap::new(),
        }
    }
}

/// Typed pub/sub on top of a `Broker`. Cloning an `EventBus` shares the same
/// broker connection and dispatch task.
pub struct EventBus {
    broker: Arc<dyn Broker>,
    state: Arc<Mutex<BusState>>,
    consumer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    reply_counter: AtomicU64,
    source: String,
}

impl EventBus {
    pub fn new(broker: Arc<dyn Broker>, source: impl Into<String>) -> Self {
        Self {
            broker,
            state: Arc::new(Mutex::new(BusState::new())),
            consumer: Mutex::new(None),
            reply_counter: AtomicU64::new(0),
            source: source.into(),
        }
    }

    /// Open the broker connection and start the background task that
    /// multicasts every inbound event to streams, callbacks, and request
    /// waiters.
    pub async fn connect(&self) -> Result<()> {
        self.broker.connect().await?;

        let broker = self.broker.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            loop {
                match broker.next().await {
                    Ok((channel, event)) => {
                        dispatch_one(&state, &channel, event).await;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "event bus consumer stopped");
                        break;
                    }
                }
            }
        });
        *self.consumer.lock() = Some(handle);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.consumer.lock().take() {
            handle.abort();
        }
        let mut state = self.state.lock();
        for (_, sender) in state.streams.drain(..) {
            let sender = sender.clone();
            tokio::spawn(async move { sender.close().await });
        }
        drop(state);
        self.broker.disconnect().await
    }

    /// Register a persistent callback. Returns nothing to unregister against
    /// — callers that need scoped lifetimes should use `subscribe` instead.
    pub fn add_callback(&self, callback: EventCallback) {
        let channel = callback.channel.clone();
        self.state.lock().callbacks.register(callback);
        self.ensure_subscribed(&channel);
    }

    fn ensure_subscribed(&self, channel: &str) {
        let mut state = self.state.lock();
        let count = state.subscriber_counts.entry(channel.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            drop(state);
            let broker = self.broker.clone();
            let channel = channel.to_string();
            tokio::spawn(async move {
                if let Err(err) = broker.subscribe(&channel).await {
                    tracing::warn!(%channel, error = %err, "failed to subscribe to channel");
                }
            });
        }
    }

    fn release_subscription(&self, channel: &str) {
        let mut state = self.state.lock();
        if let Some(count) = state.subscriber_counts.get_mut(channel) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.subscriber_counts.remove(channel);
                drop(state);
                let broker = self.broker.clone();
                let channel = channel.to_string();
                tokio::spawn(async move {
                    let _ = broker.unsubscribe(&channel).await;
                });
            }
        }
    }

    /// Scoped subscription: returns a `Subscription` handle whose `Drop`
    /// unregisters the stream and releases the broker subscription once no
    /// other subscriber needs that channel.
    pub fn subscribe(&self, channel: impl Into<String>) -> Subscription {
        let channel = channel.into();
        self.ensure_subscribed(&channel);

        let event_stream = EventStream::new(DEFAULT_STREAM_CAPACITY);
        let sender = event_stream.sender();
        self.state.lock().streams.push((channel.clone(), sender));

        Subscription {
            stream: event_stream,
            channel,
            state: self.state.clone(),
            broker: self.broker.clone(),
        }
    }

    /// Publish an event, stamping `trace_parent` from the ambient tracing
    /// span if the caller hasn't already set one.
    pub async fn publish(&self, channel: &str, mut event: Event) -> Result<()> {
        if event.trace_parent.is_none() {
            event.trace_parent = current_trace_parent();
        }
        self.broker.publish(channel, event).await
    }

    /// Publish a request and await the first reply on a fresh reply channel,
    /// timing out after `timeout_duration` (defaults to 30s).
    pub async fn publish_request_response(
        &self,
        channel: &str,
        mut event: Event,
        timeout_duration: Option<Duration>,
    ) -> Result<Event> {
        let reply_channel = format!(
            "{}.reply.{}",
            channel,
            self.reply_counter.fetch_add(1, Ordering::Relaxed)
        );
        if event.correlation_id.is_none() {
            event.correlation_id = Some(Uuid::now_v7().to_string());
        }
        event.reply_channel = Some(reply_channel.clone());
        let correlation_id = event.correlation_id.clone().expect("set above");

        let (tx, rx) = oneshot::channel();
        self.state.lock().waiters.insert(correlation_id.clone(), tx);
        self.ensure_subscribed(&reply_channel);

        self.publish(channel, event).await?;

        let wait = timeout(timeout_duration.unwrap_or(DEFAULT_REQUEST_TIMEOUT), rx).await;
        self.release_subscription(&reply_channel);
        self.state.lock().waiters.remove(&correlation_id);

        match wait {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(DagforgeError::Broker("reply sender dropped".to_string())),
            Err(_) => Err(DagforgeError::Broker(format!(
                "timed out waiting for a reply on {reply_channel}"
            ))),
        }
    }

    /// Reply to a request event, addressing its `reply_channel` and carrying
    /// forward its `correlation_id`.
    pub async fn publish_response(&self, request: &Event, data: serde_json::Value) -> Result<()> {
        let reply_channel = request
            .reply_channel
            .clone()
            .ok_or_else(|| DagforgeError::Validation("request event has no reply_channel".to_string()))?;
        let mut response = ResponseEvent { data }.into_event_on(&reply_channel, &self.source);
        response.correlation_id = request.correlation_id.clone();
        self.publish(&reply_channel, response).await
    }
}

async fn dispatch_one(state: &Arc<Mutex<BusState>>, channel: &str, event: Event) {
    if let Some(correlation_id) = &event.correlation_id {
        let waiter = state.lock().waiters.remove(correlation_id);
        if let Some(waiter) = waiter {
            let _ = waiter.send(event.clone());
        }
    }

    let stream_senders: Vec<EventStreamSender> = {
        let state = state.lock();
        state
            .streams
            .iter()
            .filter(|(c, _)| c == channel || c == crate::callback::ALL)
            .map(|(_, s)| s.clone())
            .collect()
    };
    for sender in stream_senders {
        sender.push(event.clone()).await;
    }

    let callbacks = state.lock().callbacks.matching(channel, &event.event_type);
    for callback in callbacks {
        (callback.handler)(event.clone()).await;
    }
}

fn current_trace_parent() -> Option<String> {
    None
}

/// Owns an `EventStream` plus the bookkeeping to release it cleanly. Drop
/// releases the broker subscription if this was the last interested party.
pub struct Subscription {
    stream: EventStream,
    channel: String,
    state: Arc<Mutex<BusState>>,
    broker: Arc<dyn Broker>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<crate::stream::StreamItem> {
        self.stream.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(count) = state.subscriber_counts.get_mut(&self.channel) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.subscriber_counts.remove(&self.channel);
                let broker = self.broker.clone();
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    let _ = broker.unsubscribe(&channel).await;
                });
            }
        }
    }
}

trait ResponseEventExt {
    fn into_event_on(self, channel: &str, source: &str) -> Event;
}

impl ResponseEventExt for ResponseEvent {
    fn into_event_on(self, channel: &str, source: &str) -> Event {
        Event::new(
            channel,
            "ResponseEvent",
            source,
            serde_json::to_value(&self).expect("ResponseEvent is always serializable"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    async fn connected_bus() -> EventBus {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let bus = EventBus::new(broker, "test");
        bus.connect().await.unwrap();
        bus
    }

    #[tokio::test]
    async fn subscription_receives_published_events() {
        let bus = connected_bus().await;
        let mut sub = bus.subscribe("workflows");
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish("workflows", Event::new("workflows", "Ping", "test", Value::Null))
            .await
            .unwrap();

        let item = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert!(item.is_some());
    }

    #[tokio::test]
    async fn callback_fires_for_matching_event_type() {
        let bus = connected_bus().await;
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        bus.add_callback(EventCallback::new(
            "workflows",
            "Ping",
            Arc::new(move |_event| {
                let fired = fired_clone.clone();
                Box::pin(async move {
                    fired.store(true, AtomicOrdering::SeqCst);
                })
            }),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish("workflows", Event::new("workflows", "Ping", "test", Value::Null))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(fired.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test]
    async fn request_response_round_trips() {
        let bus = Arc::new(connected_bus().await);
        let responder = bus.clone();

        bus.add_callback(EventCallback::new(
            "echo",
            "Ping",
            Arc::new(move |event| {
                let responder = responder.clone();
                Box::pin(async move {
                    let _ = responder.publish_response(&event, json!({"pong": true})).await;
                })
            }),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reply = bus
            .publish_request_response(
                "echo",
                Event::new("echo", "Ping", "test", Value::Null),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        assert_eq!(reply.data["data"]["pong"], json!(true));
    }
}
