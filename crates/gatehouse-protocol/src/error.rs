//! Error types for the protocol layer.
//!
//! Each crate in Gatehouse defines its own error enum. A `ProtocolError`
//! always means the problem is in the bytes or the envelope, never in the
//! network or in session state. Protocol errors are message-granular: the
//! offending message is dropped and the connection stays open.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust value).
    ///
    /// Common causes: malformed JSON, a body that is not an object, or a
    /// truncated frame.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The route string has no server-type namespace (empty, or no `.`).
    #[error("invalid route: {0:?}")]
    InvalidRoute(String),
}
