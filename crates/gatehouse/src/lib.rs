//! # Gatehouse
//!
//! The frontend connector of a multiplayer server cluster.
//!
//! Gatehouse accepts client sockets, screens them against an IP blacklist,
//! gives each one a session, optionally checks an RSA signature on every
//! message, and hands messages to a backend router. Responses go back out
//! through a push dispatcher; [`SessionPush`] writes them straight to the
//! client sockets. Applications plug in the parts that are
//! theirs (routing, delivery, task queues) as traits; the connector does
//! the bookkeeping.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatehouse::prelude::*;
//!
//! // Implement BackendRouter and PushDispatcher, then:
//! // let transport = WebSocketTransport::bind("0.0.0.0:3010").await?;
//! // let mut connector = Connector::builder(transport)
//! //     .backend(Arc::new(MyRouter))
//! //     .session_store(Arc::new(SessionService::new()))
//! //     .push_dispatcher(Arc::new(MyPush))
//! //     .start()?;
//! // connector.after_start();
//! ```

mod admission;
mod config;
mod connector;
mod error;
mod events;
mod peers;
mod pipeline;

pub use admission::{Admission, AdmissionFilter};
pub use config::ConnectorConfig;
pub use connector::{Connector, ConnectorBuilder};
pub use error::{AdmissionError, ConnectorError, GatehouseError, PushError};
pub use events::{ConnectorEvent, EventBus};
pub use peers::{BackendRouter, BlacklistProvider, PushDispatcher, Reply, SessionPush, TaskManager};

pub use gatehouse_protocol as protocol;
pub use gatehouse_session as session;
pub use gatehouse_transport as transport;

/// Installs a `tracing` subscriber that honours `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Does nothing if a
/// subscriber is already installed.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Everything an application needs to stand up a connector.
pub mod prelude {
    pub use std::sync::Arc;

    pub use async_trait::async_trait;

    pub use crate::{
        BackendRouter, BlacklistProvider, Connector, ConnectorBuilder, ConnectorConfig,
        ConnectorError, ConnectorEvent, EventBus, GatehouseError, PushDispatcher, PushError,
        Reply, SessionPush, TaskManager,
    };
    pub use gatehouse_protocol::{Message, MessageKind, SendOptions};
    pub use gatehouse_session::{
        ConnectionRegistry, ConnectionStats, FrontendSession, KeyMaterial, SessionService,
        SessionStore,
    };
    pub use gatehouse_transport::{ConnectionId, Transport};
    #[cfg(feature = "websocket")]
    pub use gatehouse_transport::WebSocketTransport;
}
