//! Session types: the server's record of one client connection.
//!
//! A session tracks:
//! - WHICH connection it belongs to (`ConnectionId`, fixed for life)
//! - WHO the client is, once a backend binds a `uid`
//! - WHAT state it is in (unbound, bound, closed)
//! - the attribute bag backend handlers read and write
//! - the client's public key, once pairing has happened

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use gatehouse_transport::{ConnectionId, SocketHandle};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::{KeyPairing, PublicKey, SessionError};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The lifecycle state of a session.
///
/// ```text
///   Unbound ──(bind)──→ Bound ──(bind)──→ Bound (uid overwritten)
///      │                  │
///      └─────(closed)─────┴──→ Closed   (terminal, entered exactly once)
/// ```
///
/// `unbind` clears the uid but leaves the state alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound,
    Closed,
}

// ---------------------------------------------------------------------------
// SessionListener
// ---------------------------------------------------------------------------

/// Receives a session's lifecycle events.
///
/// The connector installs one listener per session when it first binds
/// the session to its socket. Callbacks run synchronously on the thread
/// that triggered them, never while the session's state lock is held, so
/// a listener may read the session.
///
/// Callbacks for one session never overlap and `on_closed` is always the
/// last. A listener must not bind, unbind or close the session it is
/// called for.
pub trait SessionListener: Send + Sync + 'static {
    /// The session was bound to `uid`. `previous` is the uid it replaced,
    /// if the session was already bound to a different one.
    fn on_bind(&self, session: &Session, uid: &str, previous: Option<&str>);

    /// The session was unbound from `uid`.
    fn on_unbind(&self, session: &Session, uid: &str);

    /// The session closed. Fires once per session.
    fn on_closed(&self, session: &Session);
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Inner {
    uid: Option<String>,
    state: SessionState,
    settings: Map<String, Value>,
    key: KeyPairing,
}

/// One client connection's server-side state.
///
/// Sessions are shared as `Arc<Session>`; every mutator takes `&self`.
pub struct Session {
    id: ConnectionId,
    server_id: String,
    remote_addr: SocketAddr,
    socket: Weak<dyn SocketHandle>,
    inner: Mutex<Inner>,
    /// Held across a lifecycle change and its listener callback.
    lifecycle: Mutex<()>,
    closed: AtomicBool,
    listener: OnceLock<Arc<dyn SessionListener>>,
}

impl Session {
    /// Creates an unbound session for connection `id`.
    ///
    /// `socket` is a weak reference: the session can kick the client but
    /// never keeps the socket alive.
    pub fn new(
        id: ConnectionId,
        server_id: impl Into<String>,
        remote_addr: SocketAddr,
        socket: Weak<dyn SocketHandle>,
    ) -> Self {
        Self {
            id,
            server_id: server_id.into(),
            remote_addr,
            socket,
            inner: Mutex::new(Inner {
                uid: None,
                state: SessionState::Unbound,
                settings: Map::new(),
                key: KeyPairing::Pending,
            }),
            lifecycle: Mutex::new(()),
            closed: AtomicBool::new(false),
            listener: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The id of the frontend server that owns this session.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The bound user id, if any. Still readable after close.
    pub fn uid(&self) -> Option<String> {
        self.inner.lock().uid.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Installs the lifecycle listener. Only the first call wins.
    ///
    /// Returns `false` if a listener was already installed.
    pub fn set_listener(&self, listener: Arc<dyn SessionListener>) -> bool {
        self.listener.set(listener).is_ok()
    }

    /// Binds the session to a user id.
    ///
    /// Binding an already-bound session overwrites the previous uid.
    ///
    /// # Errors
    /// [`SessionError::Closed`] once the session has closed.
    pub fn bind(&self, uid: impl Into<String>) -> Result<(), SessionError> {
        let uid = uid.into();
        let _lifecycle = self.lifecycle.lock();
        let previous = {
            let mut inner = self.inner.lock();
            if self.is_closed() {
                return Err(SessionError::Closed(self.id));
            }
            let previous = inner.uid.replace(uid.clone()).filter(|prev| *prev != uid);
            if let Some(previous) = &previous {
                tracing::warn!(
                    session_id = %self.id,
                    %previous,
                    %uid,
                    "rebinding session to a different uid"
                );
            }
            inner.state = SessionState::Bound;
            previous
        };

        if let Some(listener) = self.listener.get() {
            listener.on_bind(self, &uid, previous.as_deref());
        }
        Ok(())
    }

    /// Unbinds the session from `uid`.
    ///
    /// # Errors
    /// - [`SessionError::Closed`] once the session has closed.
    /// - [`SessionError::UidMismatch`] if the session is not bound to `uid`.
    pub fn unbind(&self, uid: &str) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock();
        {
            let mut inner = self.inner.lock();
            if self.is_closed() {
                return Err(SessionError::Closed(self.id));
            }
            if inner.uid.as_deref() != Some(uid) {
                return Err(SessionError::UidMismatch {
                    id: self.id,
                    uid: uid.to_string(),
                });
            }
            inner.uid = None;
        }

        if let Some(listener) = self.listener.get() {
            listener.on_unbind(self, uid);
        }
        Ok(())
    }

    /// Reads an attribute.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().settings.get(key).cloned()
    }

    /// Writes an attribute.
    ///
    /// # Errors
    /// [`SessionError::Closed`] once the session has closed.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if self.is_closed() {
            return Err(SessionError::Closed(self.id));
        }
        inner.settings.insert(key.into(), value);
        Ok(())
    }

    /// Removes an attribute, returning its old value.
    ///
    /// # Errors
    /// [`SessionError::Closed`] once the session has closed.
    pub fn remove(&self, key: &str) -> Result<Option<Value>, SessionError> {
        let mut inner = self.inner.lock();
        if self.is_closed() {
            return Err(SessionError::Closed(self.id));
        }
        Ok(inner.settings.shift_remove(key))
    }

    /// Marks the session closed and notifies the listener.
    ///
    /// Safe to call from every terminal signal (disconnect, error, kick):
    /// only the first call has any effect. Returns `true` for that call.
    pub fn closed(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.lock().state = SessionState::Closed;
        tracing::debug!(session_id = %self.id, "session closed");

        if let Some(listener) = self.listener.get() {
            listener.on_closed(self);
        }
        true
    }

    /// Writes one encoded message to the client.
    ///
    /// # Errors
    /// - [`SessionError::Closed`] if the session has closed or its socket
    ///   is gone.
    /// - [`SessionError::Transport`] if the write fails.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.id));
        }
        let Some(socket) = self.socket.upgrade() else {
            return Err(SessionError::Closed(self.id));
        };
        socket.send_bytes(data).await?;
        Ok(())
    }

    /// Kicks the client: asks the transport to drop the socket.
    ///
    /// The transport's disconnect signal then closes the session. If the
    /// socket is already gone, the session is closed directly.
    pub fn kick(&self) {
        match self.socket.upgrade() {
            Some(socket) => socket.disconnect(),
            None => {
                self.closed();
            }
        }
    }

    /// Returns the restricted view handed to backend handlers.
    pub fn to_frontend(self: &Arc<Self>) -> FrontendSession {
        FrontendSession {
            session: Arc::clone(self),
        }
    }

    /// The paired public key, if pairing has happened.
    pub fn paired_key(&self) -> Option<Arc<PublicKey>> {
        match &self.inner.lock().key {
            KeyPairing::Bound(key) => Some(Arc::clone(key)),
            KeyPairing::Pending => None,
        }
    }

    /// Resolves the session's public key, pairing it on first use.
    ///
    /// While the key is pending, `fetch` is asked for one exactly once per
    /// call, under the session lock, so two concurrent verifications cannot
    /// both miss the key. A closed session never pairs.
    pub(crate) fn resolve_key(
        &self,
        fetch: impl FnOnce() -> Option<Arc<PublicKey>>,
    ) -> Option<Arc<PublicKey>> {
        let mut inner = self.inner.lock();
        if let KeyPairing::Bound(key) = &inner.key {
            return Some(Arc::clone(key));
        }
        if self.is_closed() {
            return None;
        }
        let key = fetch()?;
        inner.key = KeyPairing::Bound(Arc::clone(&key));
        tracing::debug!(session_id = %self.id, "public key paired with session");
        Some(key)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("server_id", &self.server_id)
            .field("uid", &inner.uid)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// FrontendSession
// ---------------------------------------------------------------------------

/// What a backend handler may do with a session.
///
/// Bind/unbind and attribute access only: no socket, no key material, no
/// way to close the session.
#[derive(Clone)]
pub struct FrontendSession {
    session: Arc<Session>,
}

impl FrontendSession {
    pub fn id(&self) -> ConnectionId {
        self.session.id()
    }

    pub fn uid(&self) -> Option<String> {
        self.session.uid()
    }

    pub fn server_id(&self) -> &str {
        self.session.server_id()
    }

    pub fn bind(&self, uid: impl Into<String>) -> Result<(), SessionError> {
        self.session.bind(uid)
    }

    pub fn unbind(&self, uid: &str) -> Result<(), SessionError> {
        self.session.unbind(uid)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.session.get(key)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), SessionError> {
        self.session.set(key, value)
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>, SessionError> {
        self.session.remove(key)
    }
}

impl fmt::Debug for FrontendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrontendSession")
            .field("id", &self.session.id())
            .finish()
    }
}

// =========================================================================
// Tests
// =========================================================================
