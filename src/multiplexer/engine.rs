//! Multiplexer engine
//!
//! This module contains the bookkeeping behind the client's subscriptions:
//! - subscriber sets per topic
//! - at most one wire subscription per topic, created when the set becomes
//!   non-empty and torn down when it becomes empty again
//! - pending intents recorded while disconnected and replayed on connect
//! - routing of inbound wire subscription ids back to topics
//!
//! Concurrency and usage notes:
//! - The API here is synchronous and is held behind the connection manager's
//!   session lock together with the connection state, so every mutation is
//!   serialized with connection transitions.
//! - Methods that talk to the broker take the live transport handle as an
//!   argument; `None` means "not connected".
//! - Callbacks are never invoked from here. `listeners` hands out a copy for
//!   the dispatcher to call after the lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::callback::Callback;
use super::topic::Topic;
use crate::transport::TransportHandle;

pub type Link = Arc<dyn TransportHandle>;

/// Broker-level subscription backing every consumer of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSubscription {
    pub id: String,
    pub topic: String,
}

/// A subscribe request waiting for the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIntent {
    pub topic: String,
    pub callback: Callback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new wire subscription was created for the topic.
    Attached,
    /// The topic already had its wire subscription.
    Reused,
    /// Not connected; the intent waits for the next successful connect.
    Queued,
}

#[derive(Debug, Default)]
pub struct Multiplexer {
    topics: HashMap<String, Topic>,
    wires: HashMap<String, WireSubscription>,
    routes: HashMap<String, String>,
    pending: Vec<PendingIntent>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `topic` and makes sure the topic has a wire
    /// subscription when `link` is live.
    pub fn subscribe(
        &mut self,
        topic: &str,
        callback: Callback,
        link: Option<&Link>,
    ) -> SubscribeOutcome {
        let added = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(callback.clone());
        if !added {
            debug!(topic, "callback already registered");
        }

        match link {
            Some(link) => {
                if self.attach(topic, link) {
                    SubscribeOutcome::Attached
                } else if self.wires.contains_key(topic) {
                    SubscribeOutcome::Reused
                } else {
                    // the wire write failed; retry on the next connect
                    self.queue(topic, callback);
                    SubscribeOutcome::Queued
                }
            }
            None => {
                self.queue(topic, callback);
                SubscribeOutcome::Queued
            }
        }
    }

    /// Removes `callback` from `topic`. Tears the wire subscription down once
    /// nobody is left. Returns `false` if the callback was not registered.
    pub fn unsubscribe(&mut self, topic: &str, callback: &Callback, link: Option<&Link>) -> bool {
        self.pending
            .retain(|intent| !(intent.topic == topic && intent.callback == *callback));

        let Some(entry) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = entry.unsubscribe(callback);
        if removed {
            debug!(
                topic = %entry.name,
                remaining = entry.subscribers.len(),
                "subscriber removed"
            );
        }
        if entry.is_empty() {
            self.topics.remove(topic);
            self.detach(topic, link);
        }
        removed
    }

    /// Unsubscribes every callback of every topic matching `predicate`.
    /// Returns the number of topics torn down.
    pub fn unsubscribe_all<F>(&mut self, predicate: F, link: Option<&Link>) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let matching: Vec<String> = self
            .topics
            .keys()
            .filter(|topic| predicate(topic))
            .cloned()
            .collect();

        for topic in &matching {
            let callbacks = self
                .topics
                .get(topic)
                .map(Topic::listeners)
                .unwrap_or_default();
            for callback in &callbacks {
                self.unsubscribe(topic, callback, link);
            }
        }
        matching.len()
    }

    /// Consumes every pending intent, creating at most one wire subscription
    /// per topic. Returns the number of wire subscriptions created.
    pub fn replay(&mut self, link: &Link) -> usize {
        let intents = std::mem::take(&mut self.pending);

        let mut seen = HashSet::new();
        let topics: Vec<String> = intents
            .into_iter()
            .map(|intent| intent.topic)
            .filter(|topic| seen.insert(topic.clone()))
            .collect();

        let mut attached = 0;
        for topic in topics {
            if !self.topics.contains_key(&topic) {
                // every consumer left while we were disconnected
                continue;
            }
            if self.attach(&topic, link) {
                attached += 1;
            } else if !self.wires.contains_key(&topic) {
                self.requeue_topic(&topic);
            }
        }
        attached
    }

    /// Forgets wire subscriptions after the connection dropped and queues
    /// every live consumer again so the next connect restores them.
    pub fn requeue(&mut self) {
        self.wires.clear();
        self.routes.clear();
        let topics: Vec<String> = self.topics.keys().cloned().collect();
        for topic in topics {
            self.requeue_topic(&topic);
        }
    }

    /// Unsubscribes every wire subscription and clears every table.
    pub fn disconnect_all(&mut self, link: Option<&Link>) {
        if let Some(link) = link {
            for wire in self.wires.values() {
                if let Err(e) = link.unsubscribe(&wire.id) {
                    warn!(topic = %wire.topic, error = %e, "failed to unsubscribe during teardown");
                }
            }
        }
        self.topics.clear();
        self.wires.clear();
        self.routes.clear();
        self.pending.clear();
    }

    /// Topic backing the wire subscription `id`.
    pub fn route(&self, id: &str) -> Option<&str> {
        self.routes.get(id).map(String::as_str)
    }

    /// Resolves an inbound frame to a topic, by subscription id first and by
    /// destination when the broker omitted the id.
    pub fn resolve(&self, subscription: &str, destination: &str) -> Option<String> {
        self.route(subscription).map(str::to_string).or_else(|| {
            self.wires
                .contains_key(destination)
                .then(|| destination.to_string())
        })
    }

    /// The live set of callbacks for `topic`, copied for one dispatch.
    pub fn listeners(&self, topic: &str) -> Vec<Callback> {
        self.topics
            .get(topic)
            .map(Topic::listeners)
            .unwrap_or_default()
    }

    pub fn wire(&self, topic: &str) -> Option<&WireSubscription> {
        self.wires.get(topic)
    }

    pub fn wire_count(&self) -> usize {
        self.wires.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |t| t.subscribers.len())
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn pending(&self) -> &[PendingIntent] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.wires.is_empty() && self.pending.is_empty()
    }

    fn queue(&mut self, topic: &str, callback: Callback) {
        let intent = PendingIntent {
            topic: topic.to_string(),
            callback,
        };
        if !self.pending.contains(&intent) {
            self.pending.push(intent);
        }
    }

    fn requeue_topic(&mut self, topic: &str) {
        for callback in self.listeners(topic) {
            self.queue(topic, callback);
        }
    }

    /// Creates the wire subscription for `topic` unless one exists.
    fn attach(&mut self, topic: &str, link: &Link) -> bool {
        if self.wires.contains_key(topic) {
            return false;
        }
        let id = format!("sub-{}", Uuid::new_v4());
        if let Err(e) = link.subscribe(&id, topic) {
            warn!(topic, error = %e, "failed to create wire subscription");
            return false;
        }
        debug!(topic, id = %id, "wire subscription created");
        self.routes.insert(id.clone(), topic.to_string());
        self.wires.insert(
            topic.to_string(),
            WireSubscription {
                id,
                topic: topic.to_string(),
            },
        );
        true
    }

    fn detach(&mut self, topic: &str, link: Option<&Link>) {
        let Some(wire) = self.wires.remove(topic) else {
            return;
        };
        self.routes.remove(&wire.id);
        if let Some(link) = link {
            if let Err(e) = link.unsubscribe(&wire.id) {
                warn!(topic, error = %e, "failed to remove wire subscription");
            }
        }
        debug!(topic, id = %wire.id, "wire subscription removed");
    }
}
