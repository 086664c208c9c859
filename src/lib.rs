//! # topicmux
//!
//! `topicmux` is a client-side real-time subscription multiplexer. It keeps a
//! single broker connection (STOMP over WebSocket) per service object and lets
//! any number of independent consumers subscribe to named topics over it.
//!
//! ## Core Modules
//!
//! - `client`: `RealtimeClient`, the consumer-facing facade, plus RAII
//!   subscription guards and topic streams.
//! - `connection`: the connection manager: connect once, share the outcome,
//!   replay queued subscriptions, reconnect after a drop.
//! - `multiplexer`: topic → callback sets, one wire subscription per topic,
//!   pending intents and fan-out bookkeeping.
//! - `transport`: the broker link seam and its STOMP/WebSocket implementation.
//! - `config`: layered settings loading.
//! - `utils`: error types and logging setup.

pub mod client;
pub mod config;
pub mod connection;
pub mod multiplexer;
pub mod transport;
pub mod utils;

pub use client::{RealtimeClient, SubscriptionGuard, TopicStream};
pub use connection::{ConnectionState, CredentialProvider, StaticToken};
pub use multiplexer::{Callback, Message};
pub use utils::{MuxError, Result};
