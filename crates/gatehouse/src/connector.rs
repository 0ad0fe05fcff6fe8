//! `Connector` builder, accept loop, and per-connection handling.
//!
//! The connector is the frontend server's door. It ties together the
//! layers: transport → admission → session → pipeline → backend, and
//! hands every outbound message to the push dispatcher.
//!
//! ```text
//! accept ──→ admit(ip) ──rejected──→ disconnect
//!               │
//!            accepted ──→ handshake ──→ count ──→ get/create session ──→ recv loop
//!                                                            │
//!                                       one task per payload ┘
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use gatehouse_protocol::{
    Codec, JsonCodec, MessageDecoder, MessageEncoder, SendOptions,
};
use gatehouse_session::{
    ConnectionRegistry, ConnectionStats, KeyMaterial, KeyStore, LoginRecord, PublicKey,
    Session, SessionError, SessionListener, SessionStore, StatisticsInfo,
};
use gatehouse_transport::{Connection, ConnectionId, SocketHandle, Transport};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::admission::{Admission, AdmissionFilter};
use crate::pipeline;
use crate::{
    BackendRouter, BlacklistProvider, ConnectorConfig, ConnectorError, ConnectorEvent, EventBus,
    PushDispatcher, TaskManager,
};

/// Pause after a failed accept, so a persistent listener error cannot
/// spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// State shared by the accept loop, every connection task, and every
/// pipeline task.
pub(crate) struct Shared {
    pub(crate) config: ConnectorConfig,
    pub(crate) backend: Arc<dyn BackendRouter>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) registry: Arc<dyn ConnectionRegistry>,
    pub(crate) push: Arc<dyn PushDispatcher>,
    pub(crate) tasks: Option<Arc<dyn TaskManager>>,
    pub(crate) events: EventBus,
    pub(crate) admission: AdmissionFilter,
    pub(crate) keys: KeyStore,
    /// Custom encoder if one was given, else the transport's default.
    pub(crate) encoder: Option<Arc<dyn MessageEncoder>>,
    /// Custom decoder if one was given, else the transport's default.
    pub(crate) decoder: Option<Arc<dyn MessageDecoder>>,
}

impl Shared {
    /// Encodes `message` and hands it to the push dispatcher.
    pub(crate) async fn send(
        &self,
        request_id: Option<u64>,
        route: &str,
        message: Value,
        recipients: Vec<ConnectionId>,
        options: SendOptions,
    ) -> Result<(), ConnectorError> {
        let encoded = match &self.encoder {
            Some(encoder) => encoder.encode(request_id, route, &message),
            None => JsonCodec.encode(&message).ok(),
        };
        let Some(encoded) = encoded.filter(|bytes| !bytes.is_empty()) else {
            tracing::error!(?request_id, %route, "encoded message is empty");
            return Err(ConnectorError::Encode {
                route: route.to_string(),
            });
        };

        self.push
            .schedule(request_id, route, encoded, recipients, options)
            .await?;
        Ok(())
    }

    /// Returns the session for `conn`, creating it and installing the
    /// lifecycle hooks on first sight.
    fn get_session<C: Connection>(self: &Arc<Self>, conn: &Arc<C>) -> Arc<Session> {
        if let Some(session) = self.sessions.get(conn.id()) {
            return session;
        }

        let handle: Arc<dyn SocketHandle> = conn.clone();
        let session = self.sessions.create(
            conn.id(),
            &self.config.server_id,
            conn.remote_addr(),
            Arc::downgrade(&handle),
        );
        session.set_listener(Arc::new(SessionHooks {
            shared: Arc::downgrade(self),
        }));
        session
    }
}

// ---------------------------------------------------------------------------
// Session lifecycle hooks
// ---------------------------------------------------------------------------

/// Wires session events to statistics, task queues, and the event bus.
///
/// Holds the shared state weakly: the store owns the session, the session
/// owns its listener, and the listener must not own the store.
struct SessionHooks {
    shared: Weak<Shared>,
}

impl SessionListener for SessionHooks {
    fn on_bind(&self, session: &Session, uid: &str, previous: Option<&str>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if let Some(previous) = previous {
            shared.registry.remove_logged_in_user(previous);
        }
        shared
            .registry
            .add_logged_in_user(uid, LoginRecord::now(uid, session.remote_addr().to_string()));
        shared.events.publish(ConnectorEvent::BindSession {
            session_id: session.id(),
            uid: uid.to_string(),
        });
    }

    fn on_unbind(&self, session: &Session, uid: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared.registry.remove_logged_in_user(uid);
        shared.events.publish(ConnectorEvent::UnbindSession {
            session_id: session.id(),
            uid: uid.to_string(),
        });
    }

    fn on_closed(&self, session: &Session) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let session_id = session.id();
        let uid = session.uid();

        shared.registry.decrease_connection_count(uid.as_deref());
        if let Some(tasks) = &shared.tasks {
            tasks.close_queue(session_id, true);
        }
        shared.keys.remove_pub_key(session_id);
        shared.sessions.remove(session_id);

        tracing::info!(%session_id, ?uid, "session closed");
        shared
            .events
            .publish(ConnectorEvent::CloseSession { session_id, uid });
    }
}

/// Closes the session when the connection task exits, whatever the reason.
struct CloseGuard {
    session: Arc<Session>,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.session.closed();
    }
}

// ---------------------------------------------------------------------------
// Per-connection handling
// ---------------------------------------------------------------------------

/// Handles a single connection from accept to close.
async fn handle_connection<C: Connection>(conn: C, shared: Arc<Shared>) {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let remote = conn.remote_addr();
    tracing::debug!(%conn_id, %remote, "handling new connection");

    // --- Step 1: Admission ---
    if shared.admission.admit(remote.ip()).await == Admission::Rejected {
        conn.disconnect();
        return;
    }

    if let Err(e) = conn.handshake().await {
        tracing::debug!(%conn_id, %remote, error = %e, "handshake failed");
        conn.disconnect();
        return;
    }

    // Counted before the cap check; an overflowing client backs its count out.
    shared.registry.increase_connection_count();
    if let Some(max) = shared.config.max_connections {
        if shared.registry.connection_count() > max {
            shared.registry.decrease_connection_count(None);
            tracing::warn!(%conn_id, %remote, max, "connection limit reached, rejecting client");
            conn.disconnect();
            return;
        }
    }

    // --- Step 2: Session binding ---
    let session = shared.get_session(&conn);
    let _guard = CloseGuard {
        session: Arc::clone(&session),
    };

    // --- Step 3: Message loop ---
    loop {
        match conn.recv().await {
            Ok(Some(data)) => {
                let shared = Arc::clone(&shared);
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    pipeline::handle_payload(&shared, &session, data).await;
                });
            }
            Ok(None) => {
                tracing::debug!(%conn_id, "client disconnected");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "connection error");
                break;
            }
        }
    }

    // _guard drops here → session closes.
}

/// Accepts connections until told to stop, then shuts the transport down.
async fn accept_loop<T: Transport>(
    mut transport: T,
    shared: Arc<Shared>,
    mut stop: oneshot::Receiver<bool>,
) {
    tracing::info!(server_id = %shared.config.server_id, "connector accepting");

    let force = loop {
        tokio::select! {
            biased;
            signal = &mut stop => break signal.unwrap_or(true),
            accepted = transport.accept() => match accepted {
                Ok(conn) => {
                    tokio::spawn(handle_connection(conn, Arc::clone(&shared)));
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    };

    if let Err(e) = transport.shutdown(force).await {
        tracing::warn!(error = %e, "transport shutdown failed");
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a [`Connector`].
///
/// The backend router, session store, and push dispatcher are required;
/// everything else is optional.
///
/// # Example
///
/// ```rust,ignore
/// use gatehouse::prelude::*;
///
/// let transport = WebSocketTransport::bind("0.0.0.0:3010").await?;
/// let mut connector = Connector::builder(transport)
///     .config(ConnectorConfig::default().server_id("connector-1"))
///     .backend(Arc::new(MyRouter))
///     .session_store(Arc::new(SessionService::new()))
///     .push_dispatcher(Arc::new(MyPush))
///     .start()?;
/// connector.after_start();
/// ```
pub struct ConnectorBuilder<T: Transport> {
    transport: T,
    config: ConnectorConfig,
    backend: Option<Arc<dyn BackendRouter>>,
    sessions: Option<Arc<dyn SessionStore>>,
    registry: Option<Arc<dyn ConnectionRegistry>>,
    push: Option<Arc<dyn PushDispatcher>>,
    tasks: Option<Arc<dyn TaskManager>>,
    events: Option<EventBus>,
    blacklist_provider: Option<Arc<dyn BlacklistProvider>>,
    encoder: Option<Arc<dyn MessageEncoder>>,
    decoder: Option<Arc<dyn MessageDecoder>>,
}

impl<T: Transport> ConnectorBuilder<T> {
    /// Creates a builder around `transport` with default settings.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: ConnectorConfig::default(),
            backend: None,
            sessions: None,
            registry: None,
            push: None,
            tasks: None,
            events: None,
            blacklist_provider: None,
            encoder: None,
            decoder: None,
        }
    }

    /// Sets the connector configuration.
    pub fn config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the backend router (required).
    pub fn backend(mut self, backend: Arc<dyn BackendRouter>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the session store (required).
    pub fn session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Sets the push dispatcher (required).
    pub fn push_dispatcher(mut self, push: Arc<dyn PushDispatcher>) -> Self {
        self.push = Some(push);
        self
    }

    /// Sets the connection registry. Defaults to in-memory [`ConnectionStats`].
    pub fn connection_registry(mut self, registry: Arc<dyn ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the task manager whose queues are dropped on session close.
    pub fn task_manager(mut self, tasks: Arc<dyn TaskManager>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Shares an existing event bus. Defaults to a private one.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the blacklist provider consulted on every connection.
    pub fn blacklist_provider(mut self, provider: Arc<dyn BlacklistProvider>) -> Self {
        self.blacklist_provider = Some(provider);
        self
    }

    /// Overrides the transport's outbound encoder.
    pub fn encoder(mut self, encoder: Arc<dyn MessageEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Overrides the transport's inbound decoder.
    pub fn decoder(mut self, decoder: Arc<dyn MessageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Resolves every component and builds the connector.
    ///
    /// Nothing is accepted until [`Connector::after_start`].
    ///
    /// # Errors
    /// - [`ConnectorError::Configuration`] if a required component is missing.
    /// - [`ConnectorError::Admission`] if a static blacklist pattern is invalid.
    pub fn start(self) -> Result<Connector<T>, ConnectorError> {
        let backend = self
            .backend
            .ok_or(ConnectorError::Configuration("backend router"))?;
        let sessions = self
            .sessions
            .ok_or(ConnectorError::Configuration("session store"))?;
        let push = self
            .push
            .ok_or(ConnectorError::Configuration("push dispatcher"))?;

        let admission = AdmissionFilter::new(&self.config.blacklist, self.blacklist_provider)?;
        let registry = self.registry.unwrap_or_else(|| {
            Arc::new(ConnectionStats::new(self.config.server_id.clone())) as Arc<dyn ConnectionRegistry>
        });
        let encoder = self.encoder.or_else(|| self.transport.encoder());
        let decoder = self.decoder.or_else(|| self.transport.decoder());
        let local_addr = self.transport.local_addr();

        tracing::info!(
            server_id = %self.config.server_id,
            use_crypto = self.config.use_crypto,
            "connector started"
        );

        let shared = Arc::new(Shared {
            config: self.config,
            backend,
            sessions,
            registry,
            push,
            tasks: self.tasks,
            events: self.events.unwrap_or_default(),
            admission,
            keys: KeyStore::new(),
            encoder,
            decoder,
        });

        Ok(Connector {
            shared,
            transport: Some(self.transport),
            accept: None,
            local_addr,
        })
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

struct AcceptLoop {
    stop: oneshot::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A started connector.
///
/// Call [`after_start()`](Self::after_start) to begin accepting clients
/// and [`stop()`](Self::stop) to end.
pub struct Connector<T: Transport> {
    shared: Arc<Shared>,
    transport: Option<T>,
    accept: Option<AcceptLoop>,
    local_addr: Option<SocketAddr>,
}

impl<T: Transport> Connector<T> {
    /// Creates a builder around `transport`.
    pub fn builder(transport: T) -> ConnectorBuilder<T> {
        ConnectorBuilder::new(transport)
    }

    /// Starts the accept loop on the current Tokio runtime.
    ///
    /// Calling it again, or after [`stop()`](Self::stop), does nothing.
    pub fn after_start(&mut self) {
        let Some(transport) = self.transport.take() else {
            tracing::debug!("accept loop already started or connector stopped");
            return;
        };
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(accept_loop(transport, Arc::clone(&self.shared), stop_rx));
        self.accept = Some(AcceptLoop { stop, handle });
    }

    /// Stops accepting and shuts the transport down.
    ///
    /// With `force`, open connections are dropped; otherwise they drain.
    /// No connection is accepted once this returns. Idempotent.
    pub async fn stop(&mut self, force: bool) {
        if let Some(accept) = self.accept.take() {
            let _ = accept.stop.send(force);
            if let Err(e) = accept.handle.await {
                tracing::error!(error = %e, "accept loop ended abnormally");
            }
        } else if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.shutdown(force).await {
                tracing::warn!(error = %e, "transport shutdown failed");
            }
        } else {
            return;
        }
        tracing::info!(server_id = %self.shared.config.server_id, force, "connector stopped");
    }

    /// Encodes `message` and forwards it to the push dispatcher.
    ///
    /// # Errors
    /// - [`ConnectorError::Encode`] if encoding produced nothing; nothing
    ///   is forwarded.
    /// - [`ConnectorError::Push`] if the dispatcher fails.
    pub async fn send(
        &self,
        request_id: Option<u64>,
        route: &str,
        message: Value,
        recipients: Vec<ConnectionId>,
        options: SendOptions,
    ) -> Result<(), ConnectorError> {
        self.shared
            .send(request_id, route, message, recipients, options)
            .await
    }

    /// Registers the public key for connection `id`.
    ///
    /// # Errors
    /// [`SessionError::InvalidKey`] if the key material is unusable.
    pub fn set_pub_key(&self, id: ConnectionId, material: &KeyMaterial) -> Result<(), SessionError> {
        self.shared.keys.set_pub_key(id, material)
    }

    /// The key still waiting for connection `id`'s first signed message.
    pub fn get_pub_key(&self, id: ConnectionId) -> Option<Arc<PublicKey>> {
        self.shared.keys.get_pub_key(id)
    }

    /// Replaces the dynamic IP blacklist.
    ///
    /// # Errors
    /// [`ConnectorError::Admission`] if a pattern does not compile.
    pub fn set_blacklist(&self, patterns: &[String]) -> Result<(), ConnectorError> {
        Ok(self.shared.admission.set_blacklist(patterns)?)
    }

    /// Subscribes to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.shared.events.subscribe()
    }

    /// The session store this connector writes to.
    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.shared.sessions
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Current connection statistics.
    pub fn statistics_info(&self) -> StatisticsInfo {
        self.shared.registry.statistics_info()
    }

    /// The address the transport listens on, if it has one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.shared.config
    }
}
