//! Error types for the session layer.

use gatehouse_transport::{ConnectionId, TransportError};

/// Errors that can occur during session management.
///
/// None of these tear down a connection: they are returned to whoever
/// tried the operation (usually a backend handler through the frontend
/// view) and logged.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session has been closed; it accepts no more mutations.
    #[error("session {0} is closed")]
    Closed(ConnectionId),

    /// `unbind` was called with a uid the session is not bound to.
    #[error("session {id} is not bound to uid {uid:?}")]
    UidMismatch { id: ConnectionId, uid: String },

    /// No session exists for the connection id.
    #[error("no session for {0}")]
    NotFound(ConnectionId),

    /// Writing to the session's socket failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Public key material could not be turned into an RSA key.
    #[error("invalid public key: {0}")]
    InvalidKey(String),
}
