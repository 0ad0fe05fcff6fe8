use crate::ConnectionId;

/// Errors that can occur in the transport layer.
///
/// A transport error on a single socket is that socket's `error` signal:
/// the connector closes the session and keeps accepting.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listening socket could not be bound.
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// Accepting a TCP connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The client connected but the protocol upgrade failed.
    #[error("handshake with {peer} failed: {reason}")]
    Handshake {
        peer: std::net::SocketAddr,
        reason: String,
    },

    /// Writing to a socket failed.
    #[error("send on {id} failed: {reason}")]
    Send { id: ConnectionId, reason: String },

    /// Reading from a socket failed.
    #[error("receive on {id} failed: {reason}")]
    Receive { id: ConnectionId, reason: String },

    /// The socket has not finished its protocol upgrade yet.
    #[error("{0} has not completed its handshake")]
    NotUpgraded(ConnectionId),

    /// The socket was already asked to disconnect.
    #[error("{0} is closed")]
    Closed(ConnectionId),

    /// The transport was shut down and accepts nothing more.
    #[error("transport shut down")]
    Shutdown,
}
