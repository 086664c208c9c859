//! The `transport` module is responsible for the network link to the broker.
//!
//! It defines the seam the connection manager talks through
//! ([`TransportFactory`] / [`TransportHandle`] / [`TransportEvent`]) and the
//! production implementation: STOMP 1.2 frames over a WebSocket.

pub mod frame;
pub mod message;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::utils::Result;

pub use message::TransportEvent;
pub use websocket::WebSocketTransport;

/// Opens broker connections. Injected into the connection manager so tests
/// can substitute their own.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    /// Opens the link and starts the handshake with `credential` attached.
    ///
    /// Returning `Ok` only means the handshake was sent; its outcome is the
    /// first handshake event on the returned receiver.
    async fn open(
        &self,
        credential: &str,
    ) -> Result<(Arc<dyn TransportHandle>, UnboundedReceiver<TransportEvent>)>;
}

/// Write side of an open broker link.
pub trait TransportHandle: Send + Sync {
    fn subscribe(&self, id: &str, destination: &str) -> Result<()>;

    fn unsubscribe(&self, id: &str) -> Result<()>;

    fn send(&self, destination: &str, body: &str) -> Result<()>;

    /// Gracefully closes the link. Calling it more than once is harmless.
    fn close(&self);
}
