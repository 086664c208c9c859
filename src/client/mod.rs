//! The `client` module is the consumer-facing surface of the crate.
//!
//! It provides [`RealtimeClient`], which wraps the connection manager and the
//! multiplexer behind subscribe / unsubscribe / publish calls, and the RAII
//! adapters [`SubscriptionGuard`] and [`TopicStream`] that unsubscribe when
//! the owning consumer goes away.

pub mod realtime_client;
pub mod subscription;

pub use realtime_client::RealtimeClient;
pub use subscription::{SubscriptionGuard, TopicStream};
