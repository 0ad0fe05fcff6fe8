//! The inbound message pipeline: decode, verify, route, dispatch, respond.
//!
//! Every payload runs in its own task, so a slow handler for message N
//! never holds up message N+1. Responses are matched to requests by
//! message id only.

use std::sync::Arc;

use gatehouse_protocol::{route_namespace, Codec, JsonCodec, Message, SendOptions};
use gatehouse_session::Session;
use gatehouse_transport::ConnectionId;
use serde_json::{Map, Value};

use crate::connector::Shared;
use crate::Reply;

/// Status code stamped on a response when the handler failed.
const SERVER_ERROR_CODE: u64 = 500;

/// Runs one inbound payload through the pipeline.
pub(crate) async fn handle_payload(shared: &Shared, session: &Arc<Session>, data: Vec<u8>) {
    let session_id = session.id();
    if session.is_closed() {
        tracing::debug!(%session_id, "dropping payload for closed session");
        return;
    }

    let Some(mut message) = decode(shared, &data) else {
        tracing::debug!(%session_id, len = data.len(), "dropping undecodable payload");
        return;
    };

    if shared.config.use_crypto && !shared.keys.verify(Some(session), &mut message) {
        tracing::error!(%session_id, route = %message.route, "message verification failed");
        return;
    }

    let namespace = match route_namespace(&message.route) {
        Ok(namespace) => namespace.to_string(),
        Err(e) => {
            tracing::error!(%session_id, error = %e, "dropping message with invalid route");
            return;
        }
    };

    if session.is_closed() {
        tracing::debug!(%session_id, "session closed before dispatch");
        return;
    }

    // Id 0 marks a notification, like a missing id.
    let request_id = message.id.filter(|id| *id != 0);
    let route = message.route.clone();
    tracing::trace!(%session_id, %namespace, %route, ?request_id, "dispatching to backend");

    let reply = shared
        .backend
        .global_handle(message, session.to_frontend())
        .await;

    respond(shared, session_id, request_id, &route, reply).await;
}

/// Custom decoder, then the transport's default (both live in
/// `shared.decoder`), then raw JSON.
fn decode(shared: &Shared, data: &[u8]) -> Option<Message> {
    if data.is_empty() {
        return None;
    }
    match &shared.decoder {
        Some(decoder) => decoder.decode(data),
        None => JsonCodec.decode(data).ok(),
    }
}

async fn respond(
    shared: &Shared,
    session_id: ConnectionId,
    request_id: Option<u64>,
    route: &str,
    reply: Reply,
) {
    if let Some(error) = &reply.error {
        tracing::warn!(%session_id, %route, %error, "handler failed");
    }

    let Some((body, options)) = assemble_response(request_id, reply) else {
        return;
    };

    if let Err(e) = shared
        .send(request_id, route, body, vec![session_id], options)
        .await
    {
        tracing::error!(%session_id, %route, error = %e, "failed to send response");
    }
}

/// Turns a handler reply into the response body and its send options.
///
/// Returns `None` when nothing must be sent: a notification (no request
/// id) never gets a response, even if the handler produced one.
pub(crate) fn assemble_response(
    request_id: Option<u64>,
    reply: Reply,
) -> Option<(Value, SendOptions)> {
    let Reply {
        error,
        response,
        options,
    } = reply;

    if request_id.is_none() {
        if response.is_some() {
            tracing::warn!("notification handler returned a response, dropping it");
        }
        return None;
    }

    let mut body = response.unwrap_or_else(|| Value::Object(Map::new()));
    if error.is_some() {
        if let Value::Object(map) = &mut body {
            map.entry("code")
                .or_insert_with(|| Value::from(SERVER_ERROR_CODE));
        }
    }

    Some((body, SendOptions::response(options)))
}
