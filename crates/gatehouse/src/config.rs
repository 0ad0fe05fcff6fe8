//! Connector configuration.

use serde::{Deserialize, Serialize};

use crate::ConnectorError;

/// Settings for one connector instance.
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```rust
/// use gatehouse::ConnectorConfig;
///
/// let config = ConnectorConfig::from_json(r#"{"serverId": "connector-2", "useCrypto": true}"#)
///     .unwrap();
/// assert_eq!(config.server_id, "connector-2");
/// assert!(config.use_crypto);
/// assert!(config.blacklist.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorConfig {
    /// Id of the frontend server; stamped on every session.
    pub server_id: String,

    /// Require a valid signature on every inbound message.
    pub use_crypto: bool,

    /// Static IP blacklist: regular expressions matched against the
    /// client's IP address.
    pub blacklist: Vec<String>,

    /// Refuse new connections once this many are open.
    pub max_connections: Option<usize>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            server_id: "connector-server-1".to_string(),
            use_crypto: false,
            blacklist: Vec::new(),
            max_connections: None,
        }
    }
}

impl ConnectorConfig {
    /// Parses a JSON config document.
    ///
    /// # Errors
    /// [`ConnectorError::InvalidConfig`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ConnectorError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the frontend server id.
    pub fn server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    /// Enables or disables signature verification.
    pub fn use_crypto(mut self, enabled: bool) -> Self {
        self.use_crypto = enabled;
        self
    }

    /// Sets the static IP blacklist.
    pub fn blacklist(mut self, patterns: Vec<String>) -> Self {
        self.blacklist = patterns;
        self
    }

    /// Caps the number of open connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }
}
