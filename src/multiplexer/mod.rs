//! The subscription multiplexer.
//!
//! Maps many logical consumers onto at most one wire subscription per topic,
//! queues subscribe intents issued while disconnected and answers "who gets
//! this frame" for the dispatcher.
//!
//! Public types:
//! - `Multiplexer`: the bookkeeping engine, driven by the connection manager.
//! - `Callback`: a consumer, compared by identity.
//! - `Message`: what a callback receives.

pub mod callback;
pub mod engine;
pub mod message;
pub mod topic;

pub use callback::Callback;
pub use engine::{Multiplexer, PendingIntent, SubscribeOutcome, WireSubscription};
pub use message::Message;

#[cfg(test)]
mod tests;
