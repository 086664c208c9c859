//! Lifecycle adapters tying a subscription to the lifetime of a value.

use tokio::sync::mpsc::UnboundedReceiver;

use super::realtime_client::RealtimeClient;
use crate::multiplexer::{Callback, Message};

/// Keeps a callback subscribed until dropped.
pub struct SubscriptionGuard {
    client: RealtimeClient,
    topic: String,
    callback: Callback,
}

impl SubscriptionGuard {
    pub(crate) fn new(client: RealtimeClient, topic: &str, callback: Callback) -> Self {
        client.subscribe(topic, callback.clone());
        Self {
            client,
            topic: topic.to_string(),
            callback,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn callback(&self) -> &Callback {
        &self.callback
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.client.unsubscribe(&self.topic, &self.callback);
    }
}

/// Messages of one topic as a channel. Unsubscribes when dropped.
pub struct TopicStream {
    guard: SubscriptionGuard,
    rx: UnboundedReceiver<Message>,
}

impl TopicStream {
    pub(crate) fn new(guard: SubscriptionGuard, rx: UnboundedReceiver<Message>) -> Self {
        Self { guard, rx }
    }

    pub fn topic(&self) -> &str {
        self.guard.topic()
    }

    /// Waits for the next message on the topic.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}
