/// Events a transport reports back to the connection manager.
///
/// The first `Connected`, `ProtocolError` or `Closed` after `open` is the
/// handshake outcome. After that, `Message` carries deliveries and `Closed`
/// marks the end of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the handshake.
    Connected,

    /// A delivery for the wire subscription `subscription`.
    Message {
        subscription: String,
        destination: String,
        body: String,
    },

    /// The broker reported a protocol-level error (STOMP `ERROR` frame).
    ProtocolError(String),

    /// The underlying connection is gone.
    Closed(Option<String>),
}
