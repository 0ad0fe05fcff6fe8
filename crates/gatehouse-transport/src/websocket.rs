//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! This is the connector's default transport. Frames are the JSON
//! envelopes of [`EnvelopeCodec`]; both text and binary frames are
//! accepted inbound, outbound frames are binary.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gatehouse_protocol::{EnvelopeCodec, MessageDecoder, MessageEncoder};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::{Connection, ConnectionId, SendFuture, SocketHandle, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// How long a client gets to send its HTTP upgrade request.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
///
/// `accept()` only accepts the TCP stream. The WebSocket upgrade runs in
/// [`Connection::handshake`], so a client that never sends its upgrade
/// request holds up nobody but itself.
pub struct WebSocketTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    stopped: AtomicBool,
    /// Flipped to `true` by a forced shutdown; every connection watches it.
    kill: watch::Sender<bool>,
    codec: Arc<EnvelopeCodec>,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    ///
    /// Bind to port `0` to let the OS pick one, then read it back with
    /// [`Transport::local_addr`].
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(TransportError::Bind)?;
        let local_addr = listener.local_addr().map_err(TransportError::Bind)?;
        tracing::info!(%local_addr, "WebSocket transport listening");

        let (kill, _) = watch::channel(false);
        Ok(Self {
            listener,
            local_addr,
            stopped: AtomicBool::new(false),
            kill,
            codec: Arc::new(EnvelopeCodec),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Sets how long a client may take to complete the WebSocket upgrade.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }

        let (stream, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %peer, "accepted TCP connection");

        Ok(WebSocketConnection {
            id,
            peer,
            pending: Mutex::new(Some(stream)),
            handshake_timeout: self.handshake_timeout,
            sink: Arc::new(Mutex::new(None)),
            stream: Mutex::new(None),
            closed: AtomicBool::new(false),
            closing: Notify::new(),
            kill: self.kill.subscribe(),
        })
    }

    async fn shutdown(&self, force: bool) -> Result<(), Self::Error> {
        self.stopped.store(true, Ordering::Release);
        if force {
            self.kill.send_replace(true);
        }
        tracing::info!(addr = %self.local_addr, force, "WebSocket transport shut down");
        Ok(())
    }

    fn encoder(&self) -> Option<Arc<dyn MessageEncoder>> {
        Some(Arc::clone(&self.codec) as Arc<dyn MessageEncoder>)
    }

    fn decoder(&self) -> Option<Arc<dyn MessageDecoder>> {
        Some(Arc::clone(&self.codec) as Arc<dyn MessageDecoder>)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

/// A single WebSocket connection.
///
/// Starts as a raw TCP stream; [`Connection::handshake`] upgrades it and
/// splits it so that a task blocked in `recv()` never holds up `send()` or
/// `disconnect()`.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    /// The TCP stream until the upgrade takes it.
    pending: Mutex<Option<TcpStream>>,
    handshake_timeout: Duration,
    sink: Arc<Mutex<Option<SplitSink<WsStream, Message>>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    closed: AtomicBool,
    closing: Notify,
    kill: watch::Receiver<bool>,
}

impl WebSocketConnection {
    fn handshake_failed(&self, reason: impl Into<String>) -> TransportError {
        TransportError::Handshake {
            peer: self.peer,
            reason: reason.into(),
        }
    }
}

/// Resolves to `true` once a forced shutdown flips the kill switch, or to
/// `false` if the transport is dropped without one.
async fn killed(mut kill: watch::Receiver<bool>) -> bool {
    kill.wait_for(|killed| *killed).await.is_ok()
}

impl SocketHandle for WebSocketConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    fn send_bytes(&self, data: Vec<u8>) -> SendFuture<'_> {
        Box::pin(async move { Connection::send(self, &data).await })
    }

    fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wakes a pending recv() or handshake(), or leaves a permit for the
        // next one.
        self.closing.notify_one();

        // Best effort close frame; outside a runtime the socket just drops.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let sink = Arc::clone(&self.sink);
        let id = self.id;
        runtime.spawn(async move {
            let mut sink = sink.lock().await;
            let Some(sink) = sink.as_mut() else {
                return;
            };
            if let Err(e) = sink.close().await {
                tracing::debug!(%id, error = %e, "close frame not delivered");
            }
        });
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn handshake(&self) -> Result<(), Self::Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed(self.id));
        }
        let Some(tcp) = self.pending.lock().await.take() else {
            return Ok(());
        };

        let upgraded = tokio::select! {
            _ = self.closing.notified() => return Err(TransportError::Closed(self.id)),
            true = killed(self.kill.clone()) => return Err(TransportError::Shutdown),
            upgraded = tokio::time::timeout(
                self.handshake_timeout,
                tokio_tungstenite::accept_async(tcp),
            ) => upgraded,
        };
        let ws = match upgraded {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return Err(self.handshake_failed(e.to_string())),
            Err(_) => return Err(self.handshake_failed("timed out")),
        };

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        tracing::debug!(id = %self.id, peer = %self.peer, "WebSocket upgrade complete");
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed(self.id));
        }
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(TransportError::NotUpgraded(self.id));
        };
        sink.send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(|e| TransportError::Send {
                id: self.id,
                reason: e.to_string(),
            })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut kill = self.kill.clone();
        let mut watching = true;
        let mut stream = self.stream.lock().await;
        let Some(stream) = stream.as_mut() else {
            return Err(TransportError::NotUpgraded(self.id));
        };

        loop {
            let killed = *kill.borrow_and_update();
            if killed || self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }

            let next = tokio::select! {
                _ = self.closing.notified() => return Ok(None),
                changed = kill.changed(), if watching => {
                    // The transport is gone; keep draining without it.
                    if changed.is_err() {
                        watching = false;
                    }
                    continue;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::Receive {
                        id: self.id,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
