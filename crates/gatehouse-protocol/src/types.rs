//! Core protocol types: the inbound envelope and outbound send options.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Body field that carries a client's hex RSA signature.
///
/// The field is stripped from the body before the body is canonicalized
/// and before the message reaches a backend handler.
pub const SIGNATURE_FIELD: &str = "__crypto__";

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An inbound client message: `{id?, route, body}`.
///
/// - `id` is the correlation id. Requests carry one and expect exactly one
///   response; notifications carry none and must never be answered.
/// - `route` is dot-delimited, `"<server type>.<handler>.<method>"`.
/// - `body` is always a JSON object. Key order is preserved because the
///   signed form of the body depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(default)]
    pub route: String,

    #[serde(default)]
    pub body: Map<String, Value>,
}

impl Message {
    /// Creates a request (a message that expects a response).
    pub fn request(id: u64, route: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: Some(id),
            route: route.into(),
            body,
        }
    }

    /// Creates a notification (fire-and-forget, no correlation id).
    pub fn notify(route: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: None,
            route: route.into(),
            body,
        }
    }

    /// Returns `true` if this message expects a response.
    pub fn is_request(&self) -> bool {
        self.id.is_some()
    }
}

/// Extracts the server-type namespace of a route: everything before the
/// first `.`.
///
/// # Errors
/// Returns [`ProtocolError::InvalidRoute`] for an empty route or a route
/// without a separator. An empty namespace (`".foo"`) is also rejected,
/// since it cannot name a server type.
pub fn route_namespace(route: &str) -> Result<&str, ProtocolError> {
    match route.split_once('.') {
        Some((namespace, _)) if !namespace.is_empty() => Ok(namespace),
        _ => Err(ProtocolError::InvalidRoute(route.to_string())),
    }
}

// ---------------------------------------------------------------------------
// SendOptions
// ---------------------------------------------------------------------------

/// What kind of frame an outbound message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Server push with no correlation id.
    Push,
    /// Answer to a client request; correlated by the request id.
    Response,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Push => f.write_str("push"),
            MessageKind::Response => f.write_str("response"),
        }
    }
}

/// Delivery options handed to the push dispatcher next to the encoded
/// message.
///
/// On the wire this is `{type, isResponse, userOptions}`. Whatever a
/// backend handler returns as options is kept verbatim under
/// `userOptions`, so handler options can never clobber the response tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,

    #[serde(default)]
    pub is_response: bool,

    #[serde(default)]
    pub user_options: Value,
}

impl SendOptions {
    /// Options for a response to a client request.
    ///
    /// `user_options` defaults to an empty object when the handler gave
    /// none.
    pub fn response(user_options: Option<Value>) -> Self {
        Self {
            kind: Some(MessageKind::Response),
            is_response: true,
            user_options: user_options.unwrap_or_else(|| Value::Object(Map::new())),
        }
    }

    /// Options for a server push.
    pub fn push() -> Self {
        Self {
            kind: Some(MessageKind::Push),
            is_response: false,
            user_options: Value::Object(Map::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_namespace_extracts_prefix() {
        assert_eq!(route_namespace("chat.sendMsg").unwrap(), "chat");
        assert_eq!(route_namespace("area.playerHandler.move").unwrap(), "area");
    }

    #[test]
    fn test_route_namespace_empty_route_is_invalid() {
        assert!(matches!(
            route_namespace(""),
            Err(ProtocolError::InvalidRoute(r)) if r.is_empty()
        ));
    }

    #[test]
    fn test_route_namespace_without_separator_is_invalid() {
        assert!(route_namespace("noop").is_err());
    }

    #[test]
    fn test_route_namespace_leading_dot_is_invalid() {
        assert!(route_namespace(".handler").is_err());
    }

    #[test]
    fn test_send_options_response_serializes_wire_names() {
        let opts = SendOptions::response(None);
        let value = serde_json::to_value(&opts).unwrap();
        assert_eq!(
            value,
            json!({"type": "response", "isResponse": true, "userOptions": {}})
        );
    }

    #[test]
    fn test_send_options_response_keeps_user_options_nested() {
        let opts = SendOptions::response(Some(json!({"type": "sneaky"})));
        assert_eq!(opts.kind, Some(MessageKind::Response));
        assert_eq!(opts.user_options, json!({"type": "sneaky"}));
    }

    #[test]
    fn test_message_missing_route_defaults_to_empty() {
        let msg: Message = serde_json::from_value(json!({"id": 3})).unwrap();
        assert_eq!(msg.route, "");
        assert!(msg.is_request());
    }
}
