//! Single-use security checks: PKCE, state, and nonce.
//!
//! Each check follows the same unset → issued → consumed lifecycle. Issuing
//! generates a high-entropy value and seals it into a short-lived cookie via
//! the token cipher; consuming decodes the cookie exactly once. The callback
//! handler emits a max-age=0 replacement cookie immediately after
//! consumption so the value can never validate twice from the browser's
//! cookie jar.

use crate::config::AuthConfig;
use crate::cookie::SetCookie;
use crate::error::{Error, Result};
use crate::jwt;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use std::fmt;

/// The three parallel check kinds, differentiated by cookie name and
/// generator but sharing one lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Pkce,
    State,
    Nonce,
}

impl CheckKind {
    /// Cookie purpose suffix for this kind.
    pub fn cookie_purpose(&self) -> &'static str {
        match self {
            CheckKind::Pkce => "pkce.code-verifier",
            CheckKind::State => "state",
            CheckKind::Nonce => "nonce",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Pkce => write!(f, "pkce"),
            CheckKind::State => write!(f, "state"),
            CheckKind::Nonce => write!(f, "nonce"),
        }
    }
}

/// Result of consuming a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckValue {
    /// The check is not in the provider's enabled set; send nothing.
    Skip,
    /// The decoded single-use value.
    Value(String),
}

impl CheckValue {
    pub fn into_option(self) -> Option<String> {
        match self {
            CheckValue::Skip => None,
            CheckValue::Value(v) => Some(v),
        }
    }
}

/// Cookie name a check of `kind` is carried in.
pub fn cookie_name(config: &AuthConfig, kind: CheckKind) -> String {
    config.purpose_cookie_name(kind.cookie_purpose())
}

fn random_urlsafe(bytes: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(&buf)
}

/// Seal a freshly generated check value into its short-lived cookie.
fn issue_cookie(config: &AuthConfig, kind: CheckKind, value: &str) -> Result<SetCookie> {
    let sealed = jwt::encode(&value, &config.secret, Some(config.check_max_age))?;
    let mut attributes = config.base_cookie_attributes();
    attributes.max_age = Some(config.check_max_age);
    Ok(SetCookie {
        name: cookie_name(config, kind),
        value: sealed,
        attributes,
    })
}

/// Max-age=0 replacement cookie emitted after a check is consumed.
pub fn clear_cookie(config: &AuthConfig, kind: CheckKind) -> SetCookie {
    let mut attributes = config.base_cookie_attributes();
    attributes.max_age = Some(0);
    SetCookie {
        name: cookie_name(config, kind),
        value: String::new(),
        attributes,
    }
}

fn consume(
    config: &AuthConfig,
    kind: CheckKind,
    enabled: bool,
    cookie_value: Option<&str>,
) -> Result<CheckValue> {
    if !enabled {
        return Ok(CheckValue::Skip);
    }
    let sealed = cookie_value.ok_or(Error::MissingCheck(kind))?;
    let value: String = jwt::decode(sealed, &config.secret).map_err(|_| Error::InvalidCheck(kind))?;
    Ok(CheckValue::Value(value))
}

/// Compute the S256 code challenge for a PKCE verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a PKCE verifier, returning the S256 challenge to send to the
/// provider and the sealed verifier cookie to store client-side.
pub fn create_pkce(config: &AuthConfig) -> Result<(String, SetCookie)> {
    // 32 random bytes → 43-character base64url verifier (RFC 7636)
    let verifier = random_urlsafe(32);
    let cookie = issue_cookie(config, CheckKind::Pkce, &verifier)?;
    Ok((pkce_challenge(&verifier), cookie))
}

/// Consume the PKCE cookie, recovering the verifier to send to the token
/// endpoint. Skipped entirely when `enabled` is false.
pub fn use_pkce(
    config: &AuthConfig,
    enabled: bool,
    cookie_value: Option<&str>,
) -> Result<CheckValue> {
    consume(config, CheckKind::Pkce, enabled, cookie_value)
}

/// Generate an anti-CSRF state value and its sealed cookie.
pub fn create_state(config: &AuthConfig) -> Result<(String, SetCookie)> {
    let state = random_urlsafe(24);
    let cookie = issue_cookie(config, CheckKind::State, &state)?;
    Ok((state, cookie))
}

/// Consume the state cookie and compare it with the `state` query parameter
/// from the callback. Fails closed whenever the check is enabled.
pub fn use_state(
    config: &AuthConfig,
    enabled: bool,
    param: Option<&str>,
    cookie_value: Option<&str>,
) -> Result<CheckValue> {
    match consume(config, CheckKind::State, enabled, cookie_value)? {
        CheckValue::Skip => Ok(CheckValue::Skip),
        CheckValue::Value(stored) => {
            let received = param.ok_or(Error::MissingCheck(CheckKind::State))?;
            if received != stored {
                return Err(Error::InvalidCheck(CheckKind::State));
            }
            Ok(CheckValue::Value(stored))
        }
    }
}

/// Generate an OIDC nonce and its sealed cookie.
pub fn create_nonce(config: &AuthConfig) -> Result<(String, SetCookie)> {
    let nonce = random_urlsafe(24);
    let cookie = issue_cookie(config, CheckKind::Nonce, &nonce)?;
    Ok((nonce, cookie))
}

/// Consume the nonce cookie, recovering the value expected in the ID token.
pub fn use_nonce(
    config: &AuthConfig,
    enabled: bool,
    cookie_value: Option<&str>,
) -> Result<CheckValue> {
    consume(config, CheckKind::Nonce, enabled, cookie_value)
}
