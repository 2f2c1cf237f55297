// Bounded per-subscriber event queue, closed by a sentinel rather than a
// channel-drop so `recv` can distinguish "closed cleanly" from "lagged".

use dagforge_core::event::Event;
use tokio::sync::mpsc;

/// Either a live event or the end-of-stream marker a disconnecting
/// subscription pushes so in-flight `recv` calls wake up instead of hanging.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(Event),
    EndOfStream,
}

/// A subscriber's view of a channel: a bounded mpsc queue fed by the bus's
/// consumer task. `send` never blocks the publisher indefinitely — a full
/// queue means the subscriber isn't draining fast enough, so overflow drops
/// the oldest unread item rather than stalling the whole bus.
pub struct EventStream {
    tx: mpsc::Sender<StreamItem>,
    rx: mpsc::Receiver<StreamItem>,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx }
    }

    pub fn sender(&self) -> EventStreamSender {
        EventStreamSender { tx: self.tx.clone() }
    }

    /// Await the next item. Returns `None` once the stream has been closed
    /// by an `EndOfStream` item and drained.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        match self.rx.recv().await {
            Some(StreamItem::EndOfStream) => None,
            other => other,
        }
    }
}

#[derive(Clone)]
pub struct EventStreamSender {
    tx: mpsc::Sender<StreamItem>,
}

impl EventStreamSender {
    pub async fn push(&self, event: Event) {
        if self.tx.send(StreamItem::Event(event)).await.is_err() {
            tracing::debug!("event stream receiver dropped before push");
        }
    }

    pub async fn close(&self) {
        let _ = self.tx.send(StreamItem::EndOfStream).await;
    }
}

/// Does `event.event_type` satisfy the schema filter a subscriber asked for?
/// An empty filter accepts everything; otherwise the type must appear
/// verbatim or the filter must contain the `$ALL` wildcard.
pub fn matches_schema(event_type: &str, accepted_types: &[String]) -> bool {
    accepted_types.is_empty()
        || accepted_types.iter().any(|t| t == "$ALL" || t == event_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn end_of_stream_terminates_recv() {
        let mut stream = EventStream::new(4);
        let sender = stream.sender();
        sender.push(Event::new("c", "T", "s", Value::Null)).await;
        sender.close().await;

        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn wildcard_accepts_any_type() {
        assert!(matches_schema("Anything", &["$ALL".to_string()]));
        assert!(matches_schema("Foo", &["Foo".to_string()]));
        assert!(!matches_schema("Foo", &["Bar".to_string()]));
        assert!(matches_schema("Foo", &[]));
    }
}
