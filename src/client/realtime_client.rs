use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::subscription::{SubscriptionGuard, TopicStream};
use crate::config::Settings;
use crate::connection::{ConnectionManager, ConnectionState, CredentialProvider};
use crate::multiplexer::{Callback, Message, PendingIntent, SubscribeOutcome, WireSubscription};
use crate::transport::{TransportFactory, WebSocketTransport};
use crate::utils::{MuxError, Result};

/// The consumer-facing service: one broker connection shared by every
/// subscriber that goes through this client (or any of its clones).
#[derive(Clone)]
pub struct RealtimeClient {
    manager: ConnectionManager,
}

impl RealtimeClient {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn TransportFactory>,
        reconnect_delay: Option<Duration>,
    ) -> Self {
        Self {
            manager: ConnectionManager::new(credentials, transport, reconnect_delay),
        }
    }

    /// Builds a client talking STOMP over WebSocket as described by `settings`.
    pub fn from_settings(
        settings: &Settings,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let transport = WebSocketTransport::new(&settings.transport)?;
        info!(url = %transport.url(), vhost = transport.vhost(), "realtime client configured");
        Ok(Self::new(
            credentials,
            Arc::new(transport),
            settings.transport.reconnect_delay(),
        ))
    }

    pub async fn ensure_connected(&self) -> Result<()> {
        self.manager.ensure_connected().await
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Unsubscribes everything, closes the connection and forgets every
    /// subscriber. The client stays usable; the next subscribe reconnects.
    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Registers `callback` for `topic`. Never blocks: while disconnected the
    /// request is queued and a connection attempt is started in the
    /// background.
    pub fn subscribe(&self, topic: &str, callback: Callback) {
        let outcome = {
            let mut session = self.manager.session();
            let link = session.link();
            session.mux.subscribe(topic, callback, link.as_ref())
        };
        debug!(topic, ?outcome, "subscribe");
        if outcome == SubscribeOutcome::Queued {
            self.manager.connect_in_background();
        }
    }

    /// Removes `callback` from `topic`. Unknown callbacks are ignored.
    pub fn unsubscribe(&self, topic: &str, callback: &Callback) {
        let mut session = self.manager.session();
        let link = session.link();
        if !session.mux.unsubscribe(topic, callback, link.as_ref()) {
            debug!(topic, "unsubscribe for unknown callback ignored");
        }
    }

    /// Unsubscribes every consumer of every topic matching `predicate`.
    /// Returns the number of topics torn down.
    pub fn unsubscribe_all<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut session = self.manager.session();
        let link = session.link();
        let torn_down = session.mux.unsubscribe_all(predicate, link.as_ref());
        debug!(torn_down, "bulk unsubscribe");
        torn_down
    }

    /// Tears down every topic whose name contains `channel_id`.
    pub fn unsubscribe_channel(&self, channel_id: &str) -> usize {
        self.unsubscribe_all(|topic| topic.contains(channel_id))
    }

    /// Best-effort publish: failures, including "not connected", are logged
    /// and swallowed.
    pub fn publish<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) {
        match self.try_publish(destination, payload) {
            Ok(()) => {}
            Err(e @ MuxError::SendDropped { .. }) => debug!(error = %e, "publish dropped"),
            Err(e) => warn!(destination, error = %e, "publish failed"),
        }
    }

    /// Like [`publish`](Self::publish) but reports the failure.
    pub fn try_publish<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> Result<()> {
        let Some(link) = self.manager.session().link() else {
            return Err(MuxError::SendDropped {
                destination: destination.to_string(),
            });
        };
        let body = serde_json::to_string(payload).map_err(|e| MuxError::Encode(e.to_string()))?;
        link.send(destination, &body)
    }

    /// Subscribes `handler` for as long as the returned guard lives.
    pub fn subscription<F>(&self, topic: &str, handler: F) -> SubscriptionGuard
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        SubscriptionGuard::new(self.clone(), topic, Callback::new(handler))
    }

    /// Subscribes to `topic` and yields its messages through a channel until
    /// the stream is dropped.
    pub fn stream(&self, topic: &str) -> TopicStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.subscription(topic, move |msg| {
            let _ = tx.send(msg.clone());
        });
        TopicStream::new(guard, rx)
    }

    pub fn pending_intents(&self) -> Vec<PendingIntent> {
        self.manager.session().mux.pending().to_vec()
    }

    /// The wire subscription backing `topic`, if any.
    pub fn wire_subscription(&self, topic: &str) -> Option<WireSubscription> {
        self.manager.session().mux.wire(topic).cloned()
    }

    pub fn wire_subscription_count(&self) -> usize {
        self.manager.session().mux.wire_count()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.manager.session().mux.subscriber_count(topic)
    }
}
