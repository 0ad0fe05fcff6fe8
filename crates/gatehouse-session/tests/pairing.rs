//! Integration tests for one-time key pairing and signed-message checks.
//!
//! The key and signatures below are fixed RSA-1024 vectors: PKCS#1 v1.5
//! signatures over the canonical form of each body.

use std::net::SocketAddr;
use std::sync::Weak;

use gatehouse_protocol::{Message, SIGNATURE_FIELD};
use gatehouse_session::{KeyMaterial, KeyStore, Session, SessionError};
use gatehouse_transport::{ConnectionId, SendFuture, SocketHandle, TransportError};
use serde_json::{json, Map, Value};

const MODULUS: &str = "b6c81a986198be3512fd282a15d2b796755db065e1ea887b854ee7c46acb96f1\
89dffc8ba33c230ee6bfd65a61117753b1237b737fa77f41137f4903e0ff3bac\
8c01fac202f542aae4f266c54bf1b86316c357f93ce75706b4dfdf351fd6eb51\
032c71526007ee1a9dcde458f5474f69a5533bca7e31eb74daae3d4f0613c2db";

/// SHA-256 over `{"msg":"hello","n":1}`.
const SIG_HELLO_SHA256: &str = "5826b51b1aa85c5d73c54325ce3fac58a627248bc164205262247a759bd3c5a3\
1688d46cdcddb84a13480453621af6a75cc15cb698af6a94b1badbac11feac45\
d1e0ec6efa04601738a7efef7e82c6c5478bedd6cc8265070e8c91d052f05eef\
18c8bd80a13f268809680a61285648a3f4a84750b78a5d3a071ef095d10d7891";

/// SHA-1 over `{"msg":"hello","n":1}`.
const SIG_HELLO_SHA1: &str = "830c24cd67efbbe5be8b607a54a675e70cd35cf46bbc5dd2447716fdf077b3a6\
a49d0fec790f859b1d3439e97364bf212d252676d41bf47118ca4f85e43c030e\
2b8aaa707efc2f794fd46691aadda3f0a5824553730af569b0a7adfd824881b6\
443ff2db5822a1bb514719ec897ef0a860eb25498926d82995b11c652578ffb0";

/// SHA-256 over the UTF-8 bytes of `{"msg":"你好"}`.
const SIG_CJK_SHA256: &str = "20c4419bb8939a0db90ede047dcf813b6bf4b4b6ed32375a36d03edf19226a5e\
3355057e83c0ab4503a903d806a3102389725f9345c92b8bd3ec21710688dcdf\
b2b59ec843c633ae5fd617e2021632b8f49772bfa5d11990bb3a222228d17e72\
b54528f729d07959d47a386fff799fcdd6ebd8a6aeabe6a887d3bb1090a7b47d";

/// SHA-256 over `{"x":[1,2.5,true,null]}`.
const SIG_ARRAY_SHA256: &str = "802c3c3cc2a8bd1022cd25ae174c4e559a4fa70e0a17779fe26c6816586e62ea\
d5da194ae6abc394d5b07d3b75d3a88885f548c091b2d9fb6e8ab14d774cc4d9\
1fa29bd9df54c75a032f66315313a0f4105c3ded748bfc19eec815a89f8f6158\
f0e850cc92199c941e347aecbc420c9f271260384eea40475e24a581955876f4";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn material() -> KeyMaterial {
    KeyMaterial {
        rsa_n: MODULUS.to_string(),
        rsa_e: 65537,
    }
}

fn session(id: u64) -> Session {
    let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
    let socket: Weak<dyn SocketHandle> = Weak::<NoSocket>::new();
    Session::new(ConnectionId::new(id), "connector-1", addr, socket)
}

struct NoSocket;

impl SocketHandle for NoSocket {
    fn id(&self) -> ConnectionId {
        ConnectionId::new(0)
    }

    fn remote_addr(&self) -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn send_bytes(&self, _data: Vec<u8>) -> SendFuture<'_> {
        Box::pin(std::future::ready(Err(TransportError::Closed(self.id()))))
    }

    fn disconnect(&self) {}
}

/// Builds a request whose body is `body` plus the signature field.
fn signed(body: Value, signature: &str) -> Message {
    let mut body: Map<String, Value> = match body {
        Value::Object(map) => map,
        other => panic!("body must be an object, got {other}"),
    };
    body.insert(SIGNATURE_FIELD.to_string(), Value::from(signature));
    Message::request(1, "connector.entryHandler.entry", body)
}

fn hello(signature: &str) -> Message {
    signed(json!({"msg": "hello", "n": 1}), signature)
}

fn paired_store(id: u64) -> KeyStore {
    let store = KeyStore::new();
    store
        .set_pub_key(ConnectionId::new(id), &material())
        .expect("key material is valid");
    store
}

// ---------------------------------------------------------------------------
// Successful verification
// ---------------------------------------------------------------------------

#[test]
fn test_verify_sha256_signature_accepts() {
    let store = paired_store(1);
    let session = session(1);
    let mut msg = hello(SIG_HELLO_SHA256);

    assert!(store.verify(Some(&session), &mut msg));
}

#[test]
fn test_verify_sha1_signature_accepts() {
    let store = paired_store(1);
    let session = session(1);
    let mut msg = hello(SIG_HELLO_SHA1);

    assert!(store.verify(Some(&session), &mut msg));
}

#[test]
fn test_verify_cjk_body_uses_utf8_bytes() {
    let store = paired_store(1);
    let session = session(1);
    let mut msg = signed(json!({"msg": "你好"}), SIG_CJK_SHA256);

    assert!(store.verify(Some(&session), &mut msg));
}

#[test]
fn test_verify_array_body_accepts() {
    let store = paired_store(1);
    let session = session(1);
    let mut msg = signed(json!({"x": [1, 2.5, true, null]}), SIG_ARRAY_SHA256);

    assert!(store.verify(Some(&session), &mut msg));
}

#[test]
fn test_verify_strips_signature_field() {
    let store = paired_store(1);
    let session = session(1);
    let mut msg = hello(SIG_HELLO_SHA256);

    store.verify(Some(&session), &mut msg);

    assert!(!msg.body.contains_key(SIGNATURE_FIELD));
    assert_eq!(Value::Object(msg.body), json!({"msg": "hello", "n": 1}));
}

// ---------------------------------------------------------------------------
// One-time pairing
// ---------------------------------------------------------------------------

#[test]
fn test_verify_moves_key_onto_session() {
    let store = paired_store(1);
    let session = session(1);
    let id = ConnectionId::new(1);
    assert!(store.get_pub_key(id).is_some());

    assert!(store.verify(Some(&session), &mut hello(SIG_HELLO_SHA256)));

    assert!(store.get_pub_key(id).is_none(), "key is evicted after pairing");
    assert!(store.is_empty());
    assert!(session.paired_key().is_some());

    // Later messages verify against the paired key.
    assert!(store.verify(Some(&session), &mut hello(SIG_HELLO_SHA1)));
}

#[test]
fn test_verify_bad_first_signature_still_pairs() {
    let store = paired_store(1);
    let session = session(1);

    assert!(!store.verify(Some(&session), &mut hello(SIG_ARRAY_SHA256)));

    assert!(store.is_empty());
    assert!(session.paired_key().is_some());
}

#[test]
fn test_verify_other_session_cannot_use_key() {
    let store = paired_store(1);
    let other = session(2);

    assert!(!store.verify(Some(&other), &mut hello(SIG_HELLO_SHA256)));
    assert_eq!(store.len(), 1, "key stays waiting for its own session");
}

#[test]
fn test_verify_closed_session_never_pairs() {
    let store = paired_store(1);
    let session = session(1);
    session.closed();

    assert!(!store.verify(Some(&session), &mut hello(SIG_HELLO_SHA256)));
    assert!(session.paired_key().is_none());
}

#[test]
fn test_set_pub_key_replaces_waiting_key() {
    let store = paired_store(1);
    store.set_pub_key(ConnectionId::new(1), &material()).unwrap();
    assert_eq!(store.len(), 1);
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[test]
fn test_verify_missing_signature_rejects() {
    let store = paired_store(1);
    let session = session(1);
    let mut body = Map::new();
    body.insert("msg".into(), Value::from("hello"));
    let mut msg = Message::request(1, "connector.entryHandler.entry", body);

    assert!(!store.verify(Some(&session), &mut msg));
    // No signature means no pairing attempt either.
    assert_eq!(store.len(), 1);
}

#[test]
fn test_verify_empty_signature_rejects() {
    let store = paired_store(1);
    let session = session(1);
    assert!(!store.verify(Some(&session), &mut hello("")));
}

#[test]
fn test_verify_without_session_rejects() {
    let store = paired_store(1);
    assert!(!store.verify(None, &mut hello(SIG_HELLO_SHA256)));
}

#[test]
fn test_verify_without_key_rejects() {
    let store = KeyStore::new();
    let session = session(1);
    assert!(!store.verify(Some(&session), &mut hello(SIG_HELLO_SHA256)));
}

#[test]
fn test_verify_tampered_body_rejects() {
    let store = paired_store(1);
    let session = session(1);
    let mut msg = signed(json!({"msg": "hello", "n": 2}), SIG_HELLO_SHA256);

    assert!(!store.verify(Some(&session), &mut msg));
}

#[test]
fn test_verify_reordered_body_rejects() {
    let store = paired_store(1);
    let session = session(1);
    let mut msg = signed(json!({"n": 1, "msg": "hello"}), SIG_HELLO_SHA256);

    assert!(!store.verify(Some(&session), &mut msg));
}

#[test]
fn test_verify_non_hex_signature_rejects() {
    let store = paired_store(1);
    let session = session(1);
    assert!(!store.verify(Some(&session), &mut hello("not-a-signature")));
}

#[test]
fn test_set_pub_key_non_hex_modulus_returns_invalid_key() {
    let store = KeyStore::new();
    let bad = KeyMaterial {
        rsa_n: "zz-not-hex".into(),
        rsa_e: 65537,
    };

    let result = store.set_pub_key(ConnectionId::new(1), &bad);

    assert!(matches!(result, Err(SessionError::InvalidKey(_))));
    assert!(store.is_empty());
}

#[test]
fn test_key_material_deserializes_from_client_json() {
    let material: KeyMaterial =
        serde_json::from_value(json!({"rsa_n": MODULUS, "rsa_e": 65537})).unwrap();
    let store = KeyStore::new();
    assert!(store.set_pub_key(ConnectionId::new(3), &material).is_ok());
    let key = store.get_pub_key(ConnectionId::new(3)).unwrap();
    assert_eq!(key.bits(), 1024);
}
