//! The session store: one session per connection id.
//!
//! # Concurrency note
//!
//! Unlike a single-owner manager, the store is shared by every connection
//! task and by backend handlers, so it locks internally. The lock is only
//! held for map operations, never while calling into a session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use gatehouse_transport::{ConnectionId, SocketHandle};
use parking_lot::RwLock;

use crate::{Session, SessionError};

/// Creates and looks up sessions by connection id.
///
/// The connector depends on this trait, not on [`SessionService`], so a
/// deployment can substitute its own store.
pub trait SessionStore: Send + Sync + 'static {
    /// Looks up the session for connection `id`.
    fn get(&self, id: ConnectionId) -> Option<Arc<Session>>;

    /// Returns the session for connection `id`, creating it if needed.
    ///
    /// At most one session ever exists per id: a second call returns the
    /// first session unchanged.
    fn create(
        &self,
        id: ConnectionId,
        server_id: &str,
        remote_addr: SocketAddr,
        socket: Weak<dyn SocketHandle>,
    ) -> Arc<Session>;

    /// Forgets the session for connection `id`.
    fn remove(&self, id: ConnectionId) -> Option<Arc<Session>>;

    /// All sessions bound to `uid` (a user may connect more than once).
    fn get_by_uid(&self, uid: &str) -> Vec<Arc<Session>>;

    /// Number of live sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kicks the client behind connection `id`.
    ///
    /// Returns `false` if no such session exists.
    fn kick_by_session_id(&self, id: ConnectionId) -> bool {
        match self.get(id) {
            Some(session) => {
                session.kick();
                true
            }
            None => false,
        }
    }
}

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct SessionService {
    sessions: RwLock<HashMap<ConnectionId, Arc<Session>>>,
}

impl SessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kicks every session bound to `uid`. Returns how many were kicked.
    pub fn kick(&self, uid: &str) -> usize {
        let sessions = self.get_by_uid(uid);
        for session in &sessions {
            session.kick();
        }
        sessions.len()
    }

    /// Writes one encoded message to the client behind connection `id`.
    ///
    /// This is how a push dispatcher reaches the transport.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] if no session exists for `id`.
    /// - [`SessionError::Closed`] or [`SessionError::Transport`] from
    ///   [`Session::send`].
    pub async fn send_message(&self, id: ConnectionId, data: Vec<u8>) -> Result<(), SessionError> {
        let session = self.get(id).ok_or(SessionError::NotFound(id))?;
        session.send(data).await
    }

    /// The client address of connection `id`.
    pub fn client_address(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.get(id).map(|session| session.remote_addr())
    }
}

impl SessionStore for SessionService {
    fn get(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    fn create(
        &self,
        id: ConnectionId,
        server_id: &str,
        remote_addr: SocketAddr,
        socket: Weak<dyn SocketHandle>,
    ) -> Arc<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(id)
            .or_insert_with(|| {
                tracing::debug!(%server_id, session_id = %id, "session created");
                Arc::new(Session::new(id, server_id, remote_addr, socket))
            });
        Arc::clone(session)
    }

    fn remove(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.write().remove(&id)
    }

    fn get_by_uid(&self, uid: &str) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|session| session.uid().as_deref() == Some(uid))
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.sessions.read().len()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{addr, CountingListener, FakeSocket};
    use std::sync::atomic::Ordering;

    fn cid(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn no_socket() -> Weak<dyn SocketHandle> {
        Weak::<FakeSocket>::new()
    }

    #[test]
    fn test_get_after_create_returns_same_instance() {
        let store = SessionService::new();

        let created = store.create(cid(1), "connector-1", addr(), no_socket());
        let fetched = store.get(cid(1)).expect("session should exist");

        assert!(Arc::ptr_eq(&created, &fetched));
    }

    #[test]
    fn test_create_twice_keeps_first_session() {
        let store = SessionService::new();
        let first = store.create(cid(1), "connector-1", addr(), no_socket());
        first.set("marker", serde_json::Value::from(1)).unwrap();

        let second = store.create(cid(1), "connector-2", addr(), no_socket());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.server_id(), "connector-1");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let store = SessionService::new();
        assert!(store.get(cid(99)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_forgets_session() {
        let store = SessionService::new();
        store.create(cid(1), "connector-1", addr(), no_socket());

        assert!(store.remove(cid(1)).is_some());
        assert!(store.get(cid(1)).is_none());
        assert!(store.remove(cid(1)).is_none());
    }

    #[test]
    fn test_get_by_uid_finds_every_bound_session() {
        let store = SessionService::new();
        store.create(cid(1), "c", addr(), no_socket()).bind("alice").unwrap();
        store.create(cid(2), "c", addr(), no_socket()).bind("alice").unwrap();
        store.create(cid(3), "c", addr(), no_socket()).bind("bob").unwrap();

        let mut ids: Vec<_> = store.get_by_uid("alice").iter().map(|s| s.id()).collect();
        ids.sort();

        assert_eq!(ids, vec![cid(1), cid(2)]);
    }

    #[test]
    fn test_kick_by_session_id_disconnects_socket() {
        let store = SessionService::new();
        let socket = FakeSocket::new(5);
        let handle: Arc<dyn SocketHandle> = socket.clone();
        store.create(cid(5), "c", addr(), Arc::downgrade(&handle));

        assert!(store.kick_by_session_id(cid(5)));
        assert!(socket.kicked.load(Ordering::SeqCst));
        assert!(!store.kick_by_session_id(cid(6)));
    }

    #[test]
    fn test_kick_by_uid_closes_detached_sessions() {
        let store = SessionService::new();
        let session = store.create(cid(1), "c", addr(), no_socket());
        let listener = Arc::new(CountingListener::default());
        session.set_listener(listener.clone());
        session.bind("alice").unwrap();

        assert_eq!(store.kick("alice"), 1);
        assert_eq!(listener.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_client_address_reports_remote() {
        let store = SessionService::new();
        store.create(cid(1), "c", addr(), no_socket());
        assert_eq!(store.client_address(cid(1)), Some(addr()));
    }

    #[tokio::test]
    async fn test_send_message_reaches_socket() {
        let store = SessionService::new();
        let socket = FakeSocket::new(7);
        let handle: Arc<dyn SocketHandle> = socket.clone();
        store.create(cid(7), "c", addr(), Arc::downgrade(&handle));

        store
            .send_message(cid(7), b"{\"ok\":true}".to_vec())
            .await
            .expect("delivery should succeed");

        assert_eq!(*socket.sent.lock(), vec![b"{\"ok\":true}".to_vec()]);
    }

    #[tokio::test]
    async fn test_send_message_unknown_id_returns_not_found() {
        let store = SessionService::new();
        let result = store.send_message(cid(8), b"x".to_vec()).await;
        assert!(matches!(result, Err(SessionError::NotFound(id)) if id == cid(8)));
    }
}
