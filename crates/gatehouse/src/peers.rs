//! The components a connector talks to but does not own.
//!
//! ```text
//!                 ┌──────────────┐
//!  client ──────→ │  Connector   │ ──global_handle──→ BackendRouter
//!                 │              │ ──schedule───────→ PushDispatcher
//!                 │              │ ──close_queue────→ TaskManager
//!                 │              │ ──fetch──────────→ BlacklistProvider
//!                 └──────────────┘
//! ```
//!
//! All of them are injected through [`ConnectorBuilder`](crate::ConnectorBuilder)
//! as `Arc<dyn Trait>`. [`SessionPush`] is a ready-made dispatcher for a
//! single frontend that delivers straight to its own sockets.

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_protocol::{Message, SendOptions};
use gatehouse_session::{FrontendSession, SessionService};
use gatehouse_transport::ConnectionId;
use serde_json::Value;

use crate::{AdmissionError, PushError};

// ---------------------------------------------------------------------------
// BackendRouter
// ---------------------------------------------------------------------------

/// Routes a client message to the server type named by its route.
#[async_trait]
pub trait BackendRouter: Send + Sync + 'static {
    /// Handles one message on behalf of `session`.
    ///
    /// For a request, the returned [`Reply`] becomes the response. For a
    /// notification, the reply should be empty.
    async fn global_handle(&self, message: Message, session: FrontendSession) -> Reply;
}

/// The outcome of handling one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Set when handling failed; the response then carries `code: 500`.
    pub error: Option<String>,
    /// The response body.
    pub response: Option<Value>,
    /// Handler options, delivered under `userOptions`.
    pub options: Option<Value>,
}

impl Reply {
    /// Nothing to say (the usual reply to a notification).
    pub fn none() -> Self {
        Self::default()
    }

    /// A successful response.
    pub fn ok(response: Value) -> Self {
        Self {
            response: Some(response),
            ..Self::default()
        }
    }

    /// A failed handling with no response body.
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Attaches handler options.
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

// ---------------------------------------------------------------------------
// PushDispatcher
// ---------------------------------------------------------------------------

/// Delivers encoded messages to client sessions.
#[async_trait]
pub trait PushDispatcher: Send + Sync + 'static {
    /// Schedules delivery of `encoded` to every session in `recipients`.
    async fn schedule(
        &self,
        request_id: Option<u64>,
        route: &str,
        encoded: Vec<u8>,
        recipients: Vec<ConnectionId>,
        options: SendOptions,
    ) -> Result<(), PushError>;
}

/// Delivers every message directly to the recipients' sockets through the
/// session service.
///
/// A recipient that is gone, or whose write fails, is logged and skipped;
/// the others still get the message.
pub struct SessionPush {
    sessions: Arc<SessionService>,
}

impl SessionPush {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl PushDispatcher for SessionPush {
    async fn schedule(
        &self,
        request_id: Option<u64>,
        route: &str,
        encoded: Vec<u8>,
        recipients: Vec<ConnectionId>,
        _options: SendOptions,
    ) -> Result<(), PushError> {
        for session_id in recipients {
            if let Err(e) = self.sessions.send_message(session_id, encoded.clone()).await {
                tracing::warn!(%session_id, %route, ?request_id, error = %e, "push delivery failed");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TaskManager
// ---------------------------------------------------------------------------

/// Owns per-session work queues.
pub trait TaskManager: Send + Sync + 'static {
    /// Drops the queue of a closed session. `forced` discards queued work.
    fn close_queue(&self, session_id: ConnectionId, forced: bool);
}

// ---------------------------------------------------------------------------
// BlacklistProvider
// ---------------------------------------------------------------------------

/// Supplies an IP blacklist on demand (a database, a config service).
///
/// Asked once per accepted connection. Patterns are regular expressions
/// matched against the client's IP address.
#[async_trait]
pub trait BlacklistProvider: Send + Sync + 'static {
    async fn fetch(&self) -> Result<Vec<String>, AdmissionError>;
}
