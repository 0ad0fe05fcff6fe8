//! Wire protocol for Gatehouse.
//!
//! This crate defines what clients and the connector say to each other:
//!
//! - **Types** ([`Message`], [`SendOptions`], [`MessageKind`]): the
//!   request envelope `{id?, route, body}` and the options that travel
//!   alongside an outbound response.
//! - **Codecs** ([`Codec`], [`JsonCodec`], [`MessageEncoder`],
//!   [`MessageDecoder`], [`EnvelopeCodec`]): how messages become bytes.
//! - **Canonical bodies** ([`signed_payload`]): the exact byte string a
//!   client signs, so signatures made by browser clients verify here.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer is the leaf of the workspace. It knows nothing about
//! sockets or sessions:
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Session (connection context)
//! ```

mod canonical;
mod codec;
mod error;
mod types;

pub use canonical::{signed_payload, to_js_json};
pub use codec::{Codec, EnvelopeCodec, JsonCodec, MessageDecoder, MessageEncoder};
pub use error::ProtocolError;
pub use types::{route_namespace, Message, MessageKind, SendOptions, SIGNATURE_FIELD};
