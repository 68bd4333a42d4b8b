//! Engine configuration.
//!
//! All configuration is resolved once at construction and read-only
//! afterwards. Defaults are applied field-by-field here rather than through
//! a deep-merge layer, so override precedence is unambiguous.

use crate::cookie::{CookieAttributes, SameSite};
use crate::error::{Error, Result};

/// Default lifetime of PKCE/state/nonce cookies: 15 minutes.
pub const DEFAULT_CHECK_MAX_AGE: i64 = 15 * 60;
/// Default lifetime of the access-token cookie: 1 hour.
pub const DEFAULT_ACCESS_MAX_AGE: i64 = 60 * 60;
/// Default lifetime of the refresh-token cookie: 1 week.
pub const DEFAULT_REFRESH_MAX_AGE: i64 = 7 * 24 * 60 * 60;

const DEFAULT_BASE_PATH: &str = "/auth";
const DEFAULT_COOKIE_NAME: &str = "latchkey";

/// Session cookie lifetimes and post-auth redirect targets.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Access-token cookie lifetime in seconds.
    pub access_max_age: i64,
    /// Refresh-token cookie lifetime in seconds.
    pub refresh_max_age: i64,
    /// Where to send the browser after a successful callback.
    pub login_redirect: String,
    /// Where to send the browser after logout.
    pub logout_redirect: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            access_max_age: DEFAULT_ACCESS_MAX_AGE,
            refresh_max_age: DEFAULT_REFRESH_MAX_AGE,
            login_redirect: "/".into(),
            logout_redirect: "/".into(),
        }
    }
}

/// Engine-wide configuration shared by every component.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret the token cipher derives its key from. Must be non-empty.
    pub secret: String,
    /// Path prefix for the default auth routes.
    pub base_path: String,
    /// Base cookie name; purposes are appended as `{name}.{purpose}`.
    pub cookie_name: String,
    /// Mark cookies Secure and use the `__Secure-` prefix.
    pub secure_cookies: bool,
    /// Lifetime of security-check cookies in seconds.
    pub check_max_age: i64,
    pub session: SessionOptions,
}

impl AuthConfig {
    /// Create a configuration with defaults.
    ///
    /// Fails fast with [`Error::Config`] on an empty secret, since an empty
    /// secret breaks the key derivation guarantees of the token cipher.
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(Error::Config("secret must not be empty".into()));
        }
        Ok(Self {
            secret,
            base_path: DEFAULT_BASE_PATH.into(),
            cookie_name: DEFAULT_COOKIE_NAME.into(),
            secure_cookies: true,
            check_max_age: DEFAULT_CHECK_MAX_AGE,
            session: SessionOptions::default(),
        })
    }

    /// Set the path prefix for the default routes.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Set the base cookie name.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Toggle Secure cookies (on by default; turn off for plain-HTTP dev).
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    /// Set the security-check cookie lifetime in seconds.
    pub fn with_check_max_age(mut self, seconds: i64) -> Self {
        self.check_max_age = seconds;
        self
    }

    /// Set session lifetimes and redirects.
    pub fn with_session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }

    /// Cookie name for a purpose: `{prefix}.{purpose}`, where the prefix is
    /// `__Secure-{name}` when cookies are secure.
    pub fn purpose_cookie_name(&self, purpose: &str) -> String {
        if self.secure_cookies {
            format!("__Secure-{}.{}", self.cookie_name, purpose)
        } else {
            format!("{}.{}", self.cookie_name, purpose)
        }
    }

    /// Base attributes shared by every cookie the engine emits.
    pub fn base_cookie_attributes(&self) -> CookieAttributes {
        CookieAttributes {
            path: Some("/".into()),
            http_only: true,
            secure: self.secure_cookies,
            same_site: Some(SameSite::Lax),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(AuthConfig::new("").unwrap_err(), Error::Config(_)));
    }

    #[test]
    fn secure_prefix_applied() {
        let cfg = AuthConfig::new("s").unwrap();
        assert_eq!(cfg.purpose_cookie_name("state"), "__Secure-latchkey.state");

        let cfg = cfg.with_secure_cookies(false);
        assert_eq!(cfg.purpose_cookie_name("state"), "latchkey.state");
    }

    #[test]
    fn defaults_match_documented_lifetimes() {
        let cfg = AuthConfig::new("s").unwrap();
        assert_eq!(cfg.check_max_age, 900);
        assert_eq!(cfg.session.access_max_age, 3600);
        assert_eq!(cfg.session.refresh_max_age, 604_800);
    }
}
