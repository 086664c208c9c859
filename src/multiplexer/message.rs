//! Message delivered to consumer callbacks.
//!
//! Fields:
//! - `topic`: the topic the consumer subscribed to
//! - `payload`: the decoded JSON body of the inbound frame
//! - `timestamp`: milliseconds since UNIX epoch at which the frame was received

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
    pub timestamp: i64,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}
