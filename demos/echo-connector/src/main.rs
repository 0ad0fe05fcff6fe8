use gatehouse::prelude::*;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Echoes every request body back. `connector.entryHandler.entry` binds
/// the session to the `uid` in the body first.
struct EchoRouter;

#[async_trait]
impl BackendRouter for EchoRouter {
    async fn global_handle(&self, message: Message, session: FrontendSession) -> Reply {
        if message.route == "connector.entryHandler.entry" {
            let Some(uid) = message.body.get("uid").and_then(Value::as_str) else {
                return Reply::error("entry requires a uid");
            };
            if let Err(e) = session.bind(uid) {
                return Reply::error(e.to_string());
            }
            return Reply::ok(json!({"code": 200, "uid": uid}));
        }
        Reply::ok(Value::Object(message.body))
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Reads the config file named by `GATEHOUSE_CONFIG`, if set.
fn load_config() -> Result<ConnectorConfig, Box<dyn std::error::Error>> {
    match std::env::var("GATEHOUSE_CONFIG") {
        Ok(path) => Ok(ConnectorConfig::from_json(&std::fs::read_to_string(path)?)?),
        Err(_) => Ok(ConnectorConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    gatehouse::init_tracing();

    let addr = std::env::args().nth(1).unwrap_or_else(|| "0.0.0.0:3010".to_string());
    let config = load_config()?;

    let transport = WebSocketTransport::bind(&addr).await?;
    let sessions = Arc::new(SessionService::new());
    let mut connector = Connector::builder(transport)
        .config(config)
        .backend(Arc::new(EchoRouter))
        .session_store(sessions.clone())
        .push_dispatcher(Arc::new(SessionPush::new(sessions)))
        .start()?;

    let mut events = connector.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(?event, "session event");
        }
    });

    connector.after_start();
    tracing::info!(%addr, "echo connector running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    connector.stop(false).await;
    Ok(())
}
