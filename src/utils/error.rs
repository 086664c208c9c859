//! Error kinds surfaced by the connection manager, the multiplexer and the
//! transports.
//!
//! `MuxError` is `Clone` because a single handshake outcome is shared by every
//! caller waiting on it.

use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxError {
    /// The credential provider had no token; no handshake was attempted.
    #[error("no credential available for the broker handshake")]
    MissingCredential,

    #[error("broker connection failed: {cause}")]
    ConnectFailed { cause: String },

    /// Publish attempted while disconnected. `publish` swallows this.
    #[error("publish to {destination} dropped: not connected")]
    SendDropped { destination: String },

    /// A single inbound frame could not be decoded.
    #[error("malformed payload on {topic}: {reason}")]
    Decode { topic: String, reason: String },

    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl MuxError {
    pub fn connect_failed(cause: impl Display) -> Self {
        Self::ConnectFailed {
            cause: cause.to_string(),
        }
    }

    /// Whether calling `ensure_connected` again can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. } | Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
