//! Authenticated token cipher for sessions and security-check cookies.
//!
//! Payloads are content-encrypted, not merely signed: session payloads may
//! carry sensitive fields. A 256-bit key is derived from the configured
//! secret with HKDF-SHA256 under process-wide salt/info constants, and the
//! payload envelope (issued-at, unique ID, optional expiry) is sealed with
//! AES-256-GCM. Any tampering, expiry, or malformed input fails with
//! [`Error::Decode`]; callers treat that as "no token present".

use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hkdf::Hkdf;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;

const KDF_SALT: &[u8] = b"latchkey.token";
const KDF_INFO: &[u8] = b"latchkey generated encryption key";
const TOKEN_PREFIX: &str = "lk1";
const NONCE_LEN: usize = 12;

/// Tolerated clock drift between encoder and decoder, in seconds.
pub const CLOCK_SKEW_SECONDS: i64 = 15;

#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope {
    iat: i64,
    jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    data: Value,
}

fn derive_key(secret: &str) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), secret.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(KDF_INFO, &mut okm)
        .map_err(|e| Error::Internal(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Encrypt a payload into an opaque token string.
///
/// `max_age` is in seconds; when present, an expiration timestamp is sealed
/// into the envelope and enforced by [`decode`].
pub fn encode<T: Serialize>(payload: &T, secret: &str, max_age: Option<i64>) -> Result<String> {
    let key = derive_key(secret)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::Internal(format!("cipher init failed: {e}")))?;

    let now = Utc::now().timestamp();
    let envelope = Envelope {
        iat: now,
        jti: hex::encode(random_bytes::<16>()),
        exp: max_age.map(|age| now + age),
        data: serde_json::to_value(payload)?,
    };
    let plaintext = serde_json::to_vec(&envelope)?;

    let nonce_bytes = random_bytes::<NONCE_LEN>();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| Error::Internal("encryption failed".into()))?;

    Ok(format!(
        "{TOKEN_PREFIX}.{}.{}",
        URL_SAFE_NO_PAD.encode(nonce_bytes),
        URL_SAFE_NO_PAD.encode(&ciphertext)
    ))
}

/// Decrypt a token produced by [`encode`], verifying integrity and expiry.
pub fn decode<T: DeserializeOwned>(token: &str, secret: &str) -> Result<T> {
    let mut parts = token.split('.');
    let (prefix, nonce_b64, ct_b64) = match (parts.next(), parts.next(), parts.next(), parts.next())
    {
        (Some(prefix), Some(nonce), Some(ct), None) => (prefix, nonce, ct),
        _ => return Err(Error::Decode),
    };
    if prefix != TOKEN_PREFIX {
        return Err(Error::Decode);
    }

    let nonce_bytes = URL_SAFE_NO_PAD.decode(nonce_b64).map_err(|_| Error::Decode)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(Error::Decode);
    }
    let ciphertext = URL_SAFE_NO_PAD.decode(ct_b64).map_err(|_| Error::Decode)?;

    let key = derive_key(secret)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::Internal(format!("cipher init failed: {e}")))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| Error::Decode)?;

    let envelope: Envelope = serde_json::from_slice(&plaintext).map_err(|_| Error::Decode)?;

    if let Some(exp) = envelope.exp {
        if Utc::now().timestamp() > exp + CLOCK_SKEW_SECONDS {
            return Err(Error::Decode);
        }
    }

    serde_json::from_value(envelope.data).map_err(|_| Error::Decode)
}
