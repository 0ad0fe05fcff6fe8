//! Error types for the connector and the unified Gatehouse error.

use gatehouse_protocol::ProtocolError;
use gatehouse_session::SessionError;
use gatehouse_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `gatehouse` crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so the `?`
/// operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum GatehouseError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, bad route).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (closed session, uid mismatch, bad key).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A connector error (configuration, encode, push, admission).
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Errors raised by the connector itself.
///
/// Only `Configuration` and `InvalidConfig` are fatal, and only at start.
/// The rest are message-granular: they are logged and reported to the
/// caller, and never tear down a session or its connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// A required component was not supplied to the builder.
    #[error("connector is missing required component: {0}")]
    Configuration(&'static str),

    /// Connector configuration could not be parsed.
    #[error("invalid connector configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    /// Encoding produced nothing to send.
    #[error("encoded message for route {route:?} is empty")]
    Encode { route: String },

    /// The push dispatcher refused or failed the delivery.
    #[error(transparent)]
    Push(#[from] PushError),

    /// A blacklist could not be installed.
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

/// A push dispatcher failure.
#[derive(Debug, thiserror::Error)]
#[error("push dispatch failed: {0}")]
pub struct PushError(pub String);

/// Errors from the admission filter's blacklist handling.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The blacklist provider could not produce a list.
    #[error("blacklist provider failed: {0}")]
    Provider(String),

    /// A blacklist entry is not a valid regular expression.
    #[error("invalid blacklist pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
