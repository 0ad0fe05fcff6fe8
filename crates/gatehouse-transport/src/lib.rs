//! Transport abstraction layer for Gatehouse.
//!
//! A transport is anything that produces client connections: WebSocket,
//! raw TCP, UDP, a message queue. The connector only sees the traits in
//! this crate:
//!
//! - [`Transport`] accepts connections and shuts down. `accept()` returns
//!   as soon as the peer is connected; any protocol upgrade happens later,
//!   in [`Connection::handshake`], on the connection's own task.
//! - [`Connection`] is one client socket. `recv()` doubles as the socket's
//!   event stream: `Ok(Some(bytes))` is a message, `Ok(None)` is a clean
//!   disconnect, `Err(_)` is an error.
//! - [`SocketHandle`] is the object-safe part of a connection, so a
//!   session can keep a `Weak<dyn SocketHandle>` without owning the
//!   socket or knowing its concrete type. It can still write to the
//!   client through [`SocketHandle::send_bytes`].
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use gatehouse_protocol::{MessageDecoder, MessageEncoder};

/// Opaque identifier for a connection. Doubles as the session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Future returned by [`SocketHandle::send_bytes`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// The object-safe view of a client socket.
///
/// Sessions hold a `Weak<dyn SocketHandle>`: they can write to or kick a
/// client, but never keep its socket alive.
pub trait SocketHandle: Send + Sync + 'static {
    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the client's address.
    fn remote_addr(&self) -> SocketAddr;

    /// Writes one encoded message to the client.
    fn send_bytes(&self, data: Vec<u8>) -> SendFuture<'_>;

    /// Asks the transport to drop this connection.
    ///
    /// Non-blocking and idempotent. The connection's `recv()` reports
    /// `Ok(None)` once the disconnect has taken effect.
    fn disconnect(&self);
}

/// Accepts new incoming connections.
///
/// The futures are `Send` so the connector can drive them from spawned
/// tasks without knowing the concrete transport.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for and accepts the next incoming connection.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Stops the transport.
    ///
    /// With `force`, every open connection is dropped immediately;
    /// otherwise existing connections drain on their own.
    fn shutdown(&self, force: bool) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// The transport's default outbound encoder, if it has one.
    fn encoder(&self) -> Option<Arc<dyn MessageEncoder>> {
        None
    }

    /// The transport's default inbound decoder, if it has one.
    fn decoder(&self) -> Option<Arc<dyn MessageDecoder>> {
        None
    }

    /// The address the transport listens on, if it has one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// A single connection that can send and receive bytes.
pub trait Connection: SocketHandle {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Completes the protocol upgrade, if the transport has one.
    ///
    /// The connector calls this once, after admission and before the first
    /// `recv()`. Transports without an upgrade step keep the default.
    fn handshake(&self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async { Ok(()) }
    }

    /// Sends data to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_orders_numerically() {
        let mut ids = vec![ConnectionId::new(3), ConnectionId::new(1), ConnectionId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![ConnectionId::new(1), ConnectionId::new(2), ConnectionId::new(3)]);
    }
}
