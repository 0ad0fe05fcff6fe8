//! Session lifecycle events published by the connector.

use gatehouse_transport::ConnectionId;
use tokio::sync::broadcast;

/// Default number of events a slow subscriber may fall behind by.
const DEFAULT_CAPACITY: usize = 256;

/// A session lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// A backend bound the session to a user.
    BindSession { session_id: ConnectionId, uid: String },
    /// A backend unbound the session from a user.
    UnbindSession { session_id: ConnectionId, uid: String },
    /// The session closed. `uid` is the user it was bound to, if any.
    CloseSession {
        session_id: ConnectionId,
        uid: Option<String>,
    },
}

impl ConnectorEvent {
    pub fn session_id(&self) -> ConnectionId {
        match self {
            ConnectorEvent::BindSession { session_id, .. }
            | ConnectorEvent::UnbindSession { session_id, .. }
            | ConnectorEvent::CloseSession { session_id, .. } => *session_id,
        }
    }
}

/// Fan-out of [`ConnectorEvent`]s to any number of subscribers.
///
/// Cloning the bus shares it. Publishing with no subscriber is fine: the
/// event is simply dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConnectorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ConnectorEvent) {
        tracing::trace!(?event, "publishing connector event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
