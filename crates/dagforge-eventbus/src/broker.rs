// Broker abstraction: memory and AMQP transports behind one trait.

use std::collections::HashMap;
use std::sync::Arc;

use dagforge_core::error::{DagforgeError, Result};
use dagforge_core::event::Event;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

/// Transport `connect`/`disconnect`/`subscribe`/`unsubscribe`/`publish`/
/// `next` contract every broker variant implements.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn subscribe(&self, channel: &str) -> Result<()>;
    async fn unsubscribe(&self, channel: &str) -> Result<()>;
    async fn publish(&self, channel: &str, event: Event) -> Result<()>;
    /// Block until the next `(channel, event)` pair is available from any
    /// subscribed channel.
    async fn next(&self) -> Result<(String, Event)>;
}

/// In-process broker: one `broadcast` channel per subscribed topic, fanned
/// into a single mpsc the bus's consumer task drains via `next`. This is the
/// default broker and what the test suite runs against.
pub struct MemoryBroker {
    inner: Mutex<MemoryBrokerInner>,
    incoming_tx: mpsc::Sender<(String, Event)>,
    incoming_rx: Mutex<Option<mpsc::Receiver<(String, Event)>>>,
}

struct MemoryBrokerInner {
    /// Per-channel sender; publishing fans the event out to every listener
    /// task that forwards into `incoming_tx`.
    channels: HashMap<String, broadcast::Sender<Event>>,
    listeners: HashMap<String, tokio::task::JoinHandle<()>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1024);
        Self {
            inner: Mutex::new(MemoryBrokerInner {
                channels: HashMap::new(),
                listeners: HashMap::new(),
            }),
            incoming_tx: tx,
            incoming_rx: Mutex::new(Some(rx)),
        }
    }

    fn channel_sender(&self, channel: &str) -> broadcast::Sender<Event> {
        let mut inner = self.inner.lock();
        inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        for (_, handle) in inner.listeners.drain() {
            handle.abort();
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        let sender = self.channel_sender(channel);
        let mut receiver = sender.subscribe();
        let forward_tx = self.incoming_tx.clone();
        let channel_owned = channel.to_string();

        let handle = tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                if forward_tx.send((channel_owned.clone(), event)).await.is_err() {
                    break;
                }
            }
        });

        let mut inner = self.inner.lock();
        inner.listeners.insert(channel.to_string(), handle);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.listeners.remove(channel) {
            handle.abort();
        }
        inner.channels.remove(channel);
        Ok(())
    }

    async fn publish(&self, channel: &str, event: Event) -> Result<()> {
        let sender = self.channel_sender(channel);
        // No active receivers is not an error: a publish with nobody
        // listening simply has no effect, matching broker semantics.
        let _ = sender.send(event);
        Ok(())
    }

    async fn next(&self) -> Result<(String, Event)> {
        let try_result = {
            let mut guard = self.incoming_rx.lock();
            let rx = guard
                .as_mut()
                .ok_or_else(|| DagforgeError::Broker("broker not connected".to_string()))?;
            rx.try_recv()
        };
        match try_result {
            Ok(pair) => Ok(pair),
            Err(mpsc::error::TryRecvError::Empty) => self.next_blocking().await,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(DagforgeError::Broker("broker channel closed".to_string()))
            }
        }
    }
}

impl MemoryBroker {
    async fn next_blocking(&self) -> Result<(String, Event)> {
        // Re-acquire outside the sync mutex's guard lifetime: `recv` awaits,
        // which we must not do while holding `parking_lot::Mutex` (it isn't
        // an async mutex). We take the receiver out, await on it, then put
        // it back.
        let mut rx = {
            let mut guard = self.incoming_rx.lock();
            guard.take()
        };
        let result = match rx.as_mut() {
            Some(r) => r
                .recv()
                .await
                .ok_or_else(|| DagforgeError::Broker("broker channel closed".to_string())),
            None => Err(DagforgeError::Broker("broker not connected".to_string())),
        };
        *self.incoming_rx.lock() = rx;
        result
    }
}

/// AMQP broker backed by `lapin`, wrapping its channel and consumer
/// primitives for the handful of operations the bus needs.
#[cfg(feature = "amqp")]
pub struct AmqpBroker {
    url: String,
    connection: Mutex<Option<Arc<lapin::Connection>>>,
    incoming_tx: mpsc::Sender<(String, Event)>,
    incoming_rx: Mutex<Option<mpsc::Receiver<(String, Event)>>>,
    consumers: Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
}

#[cfg(feature = "amqp")]
impl AmqpBroker {
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(1024);
        Arc::new(Self {
            url: url.into(),
            connection: Mutex::new(None),
            incoming_tx: tx,
            incoming_rx: Mutex::new(Some(rx)),
            consumers: Mutex::new(HashMap::new()),
        })
    }
}

#[cfg(feature = "amqp")]
#[async_trait::async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self) -> Result<()> {
        let conn = lapin::Connection::connect(&self.url, lapin::ConnectionProperties::default())
            .await
            .map_err(|e| DagforgeError::Broker(e.to_string()))?;
        *self.connection.lock() = Some(Arc::new(conn));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        {
            let mut consumers = self.consumers.lock();
            for (_, handle) in consumers.drain() {
                handle.abort();
            }
        }
        let conn = self.connection.lock().take();
        if let Some(conn) = conn {
            conn.close(200, "bye")
                .await
                .map_err(|e| DagforgeError::Broker(e.to_string()))?;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        use futures::StreamExt;
        use lapin::options::{
            BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
        };
        use lapin::types::FieldTable;
        use lapin::ExchangeKind;

        let conn = self.connection.lock().clone();
        let conn = conn.ok_or_else(|| DagforgeError::Broker("not connected".to_string()))?;
        let amqp_channel = conn
            .create_channel()
            .await
            .map_err(|e| DagforgeError::Broker(e.to_string()))?;

        amqp_channel
            .exchange_declare(
                "dagforge.events",
                ExchangeKind::Topic,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DagforgeError::Broker(e.to_string()))?;

        let queue = amqp_channel
            .queue_declare(
                &format!("dagforge.{channel}"),
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DagforgeError::Broker(e.to_string()))?;

        amqp_channel
            .queue_bind(
                queue.name().as_str(),
                "dagforge.events",
                channel,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DagforgeError::Broker(e.to_string()))?;

        let mut consumer = amqp_channel
            .basic_consume(
                queue.name().as_str(),
                "dagforge-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DagforgeError::Broker(e.to_string()))?;

        let forward_tx = self.incoming_tx.clone();
        let channel_owned = channel.to_string();
        let handle = tokio::spawn(async move {
            while let Some(Ok(delivery)) = consumer.next().await {
                if let Ok(event) = serde_json::from_slice::<Event>(&delivery.data) {
                    if forward_tx.send((channel_owned.clone(), event)).await.is_err() {
                        break;
                    }
                }
                let _ = delivery.ack(lapin::options::BasicAckOptions::default()).await;
            }
        });

        self.consumers.lock().insert(channel.to_string(), handle);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        if let Some(handle) = self.consumers.lock().remove(channel) {
            handle.abort();
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, event: Event) -> Result<()> {
        use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
        use lapin::types::FieldTable;
        use lapin::BasicProperties;
        use lapin::ExchangeKind;

        let conn = self.connection.lock().clone();
        let conn = conn.ok_or_else(|| DagforgeError::Broker("not connected".to_string()))?;
        let amqp_channel = conn
            .create_channel()
            .await
            .map_err(|e| DagforgeError::Broker(e.to_string()))?;

        amqp_channel
            .exchange_declare(
                "dagforge.events",
                ExchangeKind::Topic,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DagforgeError::Broker(e.to_string()))?;

        let payload = serde_json::to_vec(&event).map_err(|e| DagforgeError::Broker(e.to_string()))?;
        amqp_channel
            .basic_publish(
                "dagforge.events",
                channel,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| DagforgeError::Broker(e.to_string()))?;
        Ok(())
    }

    async fn next(&self) -> Result<(String, Event)> {
        let mut rx = {
            let mut guard = self.incoming_rx.lock();
            guard.take()
        };
        let result = match rx.as_mut() {
            Some(r) => r
                .recv()
                .await
                .ok_or_else(|| DagforgeError::Broker("broker channel closed".to_string())),
            None => Err(DagforgeError::Broker("broker not connected".to_string())),
        };
        *self.incoming_rx.lock() = rx;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagforge_core::event::Event;
    use serde_json::Value;

    #[tokio::test]
    async fn memory_broker_round_trips_a_publish() {
        let broker = MemoryBroker::new();
        broker.connect().await.unwrap();
        broker.subscribe("workflows").await.unwrap();

        let event = Event::new("workflows", "Test", "test", Value::Null);
        broker.publish("workflows", event.clone()).await.unwrap();

        let (channel, received) = broker.next().await.unwrap();
        assert_eq!(channel, "workflows");
        assert_eq!(received.id, event.id);
    }
}
