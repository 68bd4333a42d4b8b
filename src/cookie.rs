//! Set-Cookie serialization and Cookie header parsing.
//!
//! Serialization is strict: control characters or unknown attribute values
//! fail with [`Error::InvalidCookie`]. Parsing is deliberately lenient,
//! because inbound Cookie headers come from untrusted clients: malformed
//! pairs are dropped and undecodable values fall back to their raw form.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// SameSite cookie attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// Priority cookie attribute values (Chrome extension).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "Low"),
            Priority::Medium => write!(f, "Medium"),
            Priority::High => write!(f, "High"),
        }
    }
}

/// Attributes attached to an outbound cookie.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieAttributes {
    pub max_age: Option<i64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
    pub priority: Option<Priority>,
    pub partitioned: bool,
}

/// A cookie to emit on a response, serialized once via [`serialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub attributes: CookieAttributes,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            attributes: CookieAttributes::default(),
        }
    }

    /// Render this cookie as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> Result<String> {
        serialize(&self.name, &self.value, &self.attributes)
    }

    /// Whether this cookie is an expiring (max-age=0) replacement.
    pub fn is_expired(&self) -> bool {
        self.attributes.max_age == Some(0)
    }
}

fn has_control_chars(s: &str) -> bool {
    s.chars().any(|c| c.is_control())
}

/// Serialize a cookie into a `Set-Cookie`-compatible string.
///
/// The value is percent-encoded so that [`parse`] recovers it verbatim.
pub fn serialize(name: &str, value: &str, attributes: &CookieAttributes) -> Result<String> {
    if name.is_empty() || has_control_chars(name) || name.contains([';', '=', ' ']) {
        return Err(Error::InvalidCookie(format!("invalid cookie name: {name:?}")));
    }
    if has_control_chars(value) {
        return Err(Error::InvalidCookie("cookie value contains control characters".into()));
    }

    let mut out = format!("{}={}", name, urlencoding::encode(value));

    if let Some(max_age) = attributes.max_age {
        out.push_str(&format!("; Max-Age={max_age}"));
    }
    if let Some(domain) = &attributes.domain {
        if has_control_chars(domain) || domain.contains(';') {
            return Err(Error::InvalidCookie(format!("invalid cookie domain: {domain:?}")));
        }
        out.push_str(&format!("; Domain={domain}"));
    }
    if let Some(path) = &attributes.path {
        if has_control_chars(path) || path.contains(';') {
            return Err(Error::InvalidCookie(format!("invalid cookie path: {path:?}")));
        }
        out.push_str(&format!("; Path={path}"));
    }
    if let Some(expires) = &attributes.expires {
        out.push_str(&format!(
            "; Expires={}",
            expires.format("%a, %d %b %Y %H:%M:%S GMT")
        ));
    }
    if attributes.http_only {
        out.push_str("; HttpOnly");
    }
    if attributes.secure {
        out.push_str("; Secure");
    }
    if let Some(same_site) = attributes.same_site {
        out.push_str(&format!("; SameSite={same_site}"));
    }
    if let Some(priority) = attributes.priority {
        out.push_str(&format!("; Priority={priority}"));
    }
    if attributes.partitioned {
        out.push_str("; Partitioned");
    }

    Ok(out)
}

/// Parse a `Cookie` request header into a name → value map.
///
/// Malformed pairs (missing `=`, empty key) are silently dropped and the
/// first occurrence of a name wins. A single layer of surrounding quotes is
/// stripped before percent-decoding; values that fail to decode are kept raw.
pub fn parse(header: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();

    for pair in header.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || out.contains_key(name) {
            continue;
        }

        let mut value = value.trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }

        let decoded = match urlencoding::decode(value) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => value.to_string(),
        };

        out.insert(name.to_string(), decoded);
    }

    out
}
