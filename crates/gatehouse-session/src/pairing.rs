//! One-time public-key pairing and signed-message verification.
//!
//! A client that wants its messages verified hands the connector its RSA
//! public key out of band (`set_pub_key`). The key waits in the
//! [`KeyStore`] until the first signed message on that connection, which
//! moves it onto the session:
//!
//! ```text
//! set_pub_key(id) ──→ KeyStore[id] ──(first verify)──→ Session: KeyPending → KeyBound
//!                          └── evicted: never serves another session
//! ```
//!
//! Every signed message carries a hex RSA PKCS#1 v1.5 signature in its
//! body under [`SIGNATURE_FIELD`]. The signature covers
//! [`signed_payload`] of the body with that field removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gatehouse_protocol::{signed_payload, Message, SIGNATURE_FIELD};
use gatehouse_transport::ConnectionId;
use parking_lot::Mutex;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::{Session, SessionError};

/// Public key material as clients send it: hex modulus, numeric exponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub rsa_n: String,
    pub rsa_e: u64,
}

/// A client's RSA public key.
pub struct PublicKey {
    key: RsaPublicKey,
}

impl PublicKey {
    /// Builds a key from client-supplied material.
    ///
    /// # Errors
    /// [`SessionError::InvalidKey`] if the modulus is not hex or the
    /// key is rejected by the RSA implementation.
    pub fn from_material(material: &KeyMaterial) -> Result<Self, SessionError> {
        let n = BigUint::parse_bytes(material.rsa_n.trim().as_bytes(), 16)
            .ok_or_else(|| SessionError::InvalidKey("modulus is not a hex integer".into()))?;
        let e = BigUint::from(material.rsa_e);
        let key = RsaPublicKey::new(n, e).map_err(|e| SessionError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.key.n().bits()
    }

    /// Checks a hex signature over `payload`.
    ///
    /// The digest algorithm is not transmitted, so SHA-256, SHA-1 and
    /// SHA-512 are each tried. Hex without leading zeros is accepted.
    pub fn verify_hex(&self, payload: &[u8], signature: &str) -> bool {
        let Some(sig) = BigUint::parse_bytes(signature.trim().as_bytes(), 16) else {
            return false;
        };
        let size = self.key.size();
        let raw = sig.to_bytes_be();
        if raw.len() > size {
            return false;
        }
        let mut padded = vec![0u8; size - raw.len()];
        padded.extend_from_slice(&raw);

        let schemes = [
            (Pkcs1v15Sign::new::<Sha256>(), Sha256::digest(payload).to_vec()),
            (Pkcs1v15Sign::new::<Sha1>(), Sha1::digest(payload).to_vec()),
            (Pkcs1v15Sign::new::<Sha512>(), Sha512::digest(payload).to_vec()),
        ];
        schemes
            .into_iter()
            .any(|(scheme, hashed)| self.key.verify(scheme, &hashed, &padded).is_ok())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.bits())
            .finish()
    }
}

/// Where a session's key stands.
#[derive(Debug, Clone)]
pub enum KeyPairing {
    /// No key yet; the next verification looks in the [`KeyStore`].
    Pending,
    /// Paired; the store no longer has it.
    Bound(Arc<PublicKey>),
}

/// Transient public keys waiting for their session's first signed message.
#[derive(Default)]
pub struct KeyStore {
    pending: Mutex<HashMap<ConnectionId, Arc<PublicKey>>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the key for connection `id`, replacing any earlier one.
    ///
    /// # Errors
    /// [`SessionError::InvalidKey`] if the material is unusable.
    pub fn set_pub_key(&self, id: ConnectionId, material: &KeyMaterial) -> Result<(), SessionError> {
        let key = PublicKey::from_material(material)?;
        tracing::debug!(session_id = %id, bits = key.bits(), "public key registered");
        self.pending.lock().insert(id, Arc::new(key));
        Ok(())
    }

    /// The key still waiting for connection `id`, if any.
    pub fn get_pub_key(&self, id: ConnectionId) -> Option<Arc<PublicKey>> {
        self.pending.lock().get(&id).cloned()
    }

    /// Drops the key still waiting for connection `id`.
    ///
    /// Called when a connection closes before its first signed message.
    pub fn remove_pub_key(&self, id: ConnectionId) -> Option<Arc<PublicKey>> {
        self.pending.lock().remove(&id)
    }

    /// Number of keys waiting to be paired.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Verifies a signed message and strips its signature field.
    ///
    /// Returns `false` when the body has no signature, no session is
    /// given, no key resolves (neither paired on the session nor waiting
    /// here), or the signature does not match. A key found here is moved
    /// onto the session even if this particular signature turns out bad.
    pub fn verify(&self, session: Option<&Session>, message: &mut Message) -> bool {
        let signature = message
            .body
            .get(SIGNATURE_FIELD)
            .and_then(Value::as_str)
            .filter(|sig| !sig.is_empty())
            .map(str::to_owned);
        let Some(signature) = signature else {
            tracing::error!(route = %message.route, "message from client has no signature");
            return false;
        };

        let Some(session) = session else {
            tracing::error!(route = %message.route, "no session for signed message");
            return false;
        };

        let key = session.resolve_key(|| self.pending.lock().remove(&session.id()));
        let Some(key) = key else {
            tracing::error!(session_id = %session.id(), "no public key for session");
            return false;
        };

        message.body.shift_remove(SIGNATURE_FIELD);
        let payload = signed_payload(&message.body);

        let verified = key.verify_hex(&payload, &signature);
        if !verified {
            tracing::warn!(
                session_id = %session.id(),
                route = %message.route,
                "signature does not match message body"
            );
        }
        verified
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("pending", &self.len())
            .finish()
    }
}
