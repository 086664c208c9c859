//! Topic management
//!
//! A `Topic` holds the set of consumer callbacks registered for one topic
//! name. Registering the same callback twice is a no-op.
//!
//! Concurrency note: callers must synchronize access to `Topic` (the
//! connection manager's session lock) when modifying subscriptions.

use std::collections::HashSet;

use super::callback::Callback;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<Callback>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber to the topic. Returns `false` if it was already there.
    pub fn subscribe(&mut self, callback: Callback) -> bool {
        self.subscribers.insert(callback)
    }

    /// Remove a subscriber from the topic. Returns `false` if it was not there.
    pub fn unsubscribe(&mut self, callback: &Callback) -> bool {
        self.subscribers.remove(callback)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Copy of the current subscribers, taken for one dispatch.
    pub fn listeners(&self) -> Vec<Callback> {
        self.subscribers.iter().cloned().collect()
    }
}
