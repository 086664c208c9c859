//! Connection management.
//!
//! One broker connection per [`ConnectionManager`], opened on demand and
//! shared by every consumer:
//! - concurrent `ensure_connected` calls share a single handshake
//! - a successful handshake replays every queued subscribe intent
//! - `disconnect` tears down wire subscriptions before closing the link
//! - a dropped connection re-queues live subscriptions and, when configured,
//!   schedules one reconnect after a fixed delay

pub mod credential;
pub mod manager;
pub mod state;

pub use credential::{CredentialProvider, StaticToken};
pub use manager::ConnectionManager;
pub use state::ConnectionState;
