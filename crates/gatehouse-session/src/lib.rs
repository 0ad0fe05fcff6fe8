//! Connection session management for Gatehouse.
//!
//! This crate owns everything the connector knows about a client once its
//! socket has been admitted:
//!
//! 1. **Sessions**: one [`Session`] per connection id, created lazily,
//!    closed exactly once ([`SessionStore`], [`SessionService`]).
//! 2. **Frontend view**: the restricted [`FrontendSession`] that backend
//!    handlers get: bind/unbind and attributes, never the socket.
//! 3. **Connection statistics**: the [`ConnectionRegistry`] interface and
//!    its in-memory [`ConnectionStats`].
//! 4. **Key pairing**: one-time RSA public keys and signed-message
//!    verification ([`KeyStore`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Connector (above)  ← wires session events to stats, task queues, event bus
//!     ↕
//! Session Layer (this crate)  ← connection identity, uid binding, pairing
//!     ↕
//! Protocol + Transport (below)  ← Message, ConnectionId, SocketHandle
//! ```

mod error;
mod pairing;
mod registry;
mod session;
mod store;

pub use error::SessionError;
pub use pairing::{KeyMaterial, KeyPairing, KeyStore, PublicKey};
pub use registry::{ConnectionRegistry, ConnectionStats, LoginRecord, StatisticsInfo};
pub use session::{FrontendSession, Session, SessionListener, SessionState};
pub use store::{SessionService, SessionStore};
