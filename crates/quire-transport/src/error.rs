//! Error types for the transport layer.

/// Errors raised while accepting, reading from or writing to a client
/// socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer went away before the operation could complete.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Binding the listener or accepting a TCP stream failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The HTTP upgrade to WebSocket was rejected or malformed.
    #[error("websocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),
}

#[cfg_attr(not(feature = "websocket"), allow(dead_code))]
impl TransportError {
    /// Wraps any displayable socket error as an [`std::io::Error`] of the
    /// given kind, so callers keep a single `#[source]` type.
    pub(crate) fn io(
        kind: std::io::ErrorKind,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> std::io::Error {
        std::io::Error::new(kind, err)
    }
}
