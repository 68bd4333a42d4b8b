//! Provider configuration and the closed provider variant.
//!
//! Providers are a closed tagged enum dispatched by pattern match. Each
//! carries an immutable [`ProviderConfig`] created at startup; the engine
//! never mutates provider state between requests.

use crate::checks::CheckKind;
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClient, Request, Response};
use crate::oauth::OAuthProvider;
use crate::oidc::OidcProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Provider-derived, normalized identity record. Ownership passes to the
/// session engine once the callback resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Provider-specific extension fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            image: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Tokens returned by the provider's token endpoint. Transient: used only
/// within a single callback invocation.
#[derive(Debug, Clone, Default)]
pub struct TokenSet {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    /// Full token endpoint response body.
    pub raw: Value,
}

impl TokenSet {
    pub fn from_json(raw: Value) -> Self {
        let get_str = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            access_token: get_str("access_token"),
            refresh_token: get_str("refresh_token"),
            id_token: get_str("id_token"),
            token_type: get_str("token_type"),
            expires_in: raw.get("expires_in").and_then(Value::as_i64),
            scope: get_str("scope"),
            raw,
        }
    }
}

/// Maps the raw provider profile and token set into a normalized [`User`].
pub type ProfileFn = Arc<dyn Fn(&Value, &TokenSet) -> Result<User> + Send + Sync>;

/// Default profile mapping over standard OIDC claims.
pub fn default_profile(profile: &Value, _tokens: &TokenSet) -> Result<User> {
    let id = profile
        .get("sub")
        .or_else(|| profile.get("id"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .ok_or_else(|| Error::Provider("profile has no subject identifier".into()))?;

    let get_str = |key: &str| profile.get(key).and_then(Value::as_str).map(str::to_string);
    Ok(User {
        id,
        name: get_str("name"),
        email: get_str("email"),
        image: get_str("picture").or_else(|| get_str("image")),
        extra: serde_json::Map::new(),
    })
}

/// A provider endpoint URL plus extra request parameters passed through to
/// the provider verbatim (for example `scope` or `audience`).
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: Url,
    pub params: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

/// Immutable per-provider configuration: created at startup, read-only
/// thereafter.
#[derive(Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Discovery issuer for OIDC providers without explicit endpoints.
    pub issuer: Option<Url>,
    pub authorization: Option<Endpoint>,
    pub token: Option<Endpoint>,
    pub userinfo: Option<Endpoint>,
    /// Space-separated scope sent with the authorization request.
    pub scope: Option<String>,
    /// Enabled security checks.
    pub checks: Vec<CheckKind>,
    /// Override for the default login route path.
    pub login_path: Option<String>,
    /// Override for the default callback route path.
    pub callback_path: Option<String>,
    pub profile: ProfileFn,
}

impl ProviderConfig {
    /// Configuration for a plain OAuth2 provider. Defaults to PKCE + state
    /// checks and the standard profile mapping.
    pub fn oauth(
        id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            issuer: None,
            authorization: None,
            token: None,
            userinfo: None,
            scope: None,
            checks: vec![CheckKind::Pkce, CheckKind::State],
            login_path: None,
            callback_path: None,
            profile: Arc::new(default_profile),
        }
    }

    /// Configuration for an OIDC provider discovered from `issuer`. Adds
    /// nonce to the default check set and requests the standard scopes.
    pub fn oidc(
        id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        issuer: Url,
    ) -> Self {
        let mut config = Self::oauth(id, client_id, client_secret);
        config.issuer = Some(issuer);
        config.scope = Some("openid profile email".into());
        config.checks.push(CheckKind::Nonce);
        config
    }

    pub fn with_authorization(mut self, endpoint: Endpoint) -> Self {
        self.authorization = Some(endpoint);
        self
    }

    pub fn with_token(mut self, endpoint: Endpoint) -> Self {
        self.token = Some(endpoint);
        self
    }

    pub fn with_userinfo(mut self, endpoint: Endpoint) -> Self {
        self.userinfo = Some(endpoint);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Replace the enabled check set.
    pub fn with_checks(mut self, checks: Vec<CheckKind>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = Some(path.into());
        self
    }

    pub fn with_callback_path(mut self, path: impl Into<String>) -> Self {
        self.callback_path = Some(path.into());
        self
    }

    /// Replace the profile mapping function.
    pub fn with_profile<F>(mut self, profile: F) -> Self
    where
        F: Fn(&Value, &TokenSet) -> Result<User> + Send + Sync + 'static,
    {
        self.profile = Arc::new(profile);
        self
    }

    pub fn check_enabled(&self, kind: CheckKind) -> bool {
        self.checks.contains(&kind)
    }

    /// Login route path for this provider under `base_path`.
    pub fn resolved_login_path(&self, base_path: &str) -> String {
        self.login_path
            .clone()
            .unwrap_or_else(|| format!("{}/login/{}", base_path, self.id))
    }

    /// Callback route path for this provider under `base_path`.
    pub fn resolved_callback_path(&self, base_path: &str) -> String {
        self.callback_path
            .clone()
            .unwrap_or_else(|| format!("{}/callback/{}", base_path, self.id))
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("issuer", &self.issuer)
            .field("checks", &self.checks)
            .finish_non_exhaustive()
    }
}

/// Closed provider variant; dispatch is by pattern match, never reflection.
#[derive(Debug)]
pub enum Provider {
    OAuth(OAuthProvider),
    Oidc(OidcProvider),
}

impl Provider {
    pub fn oauth(config: ProviderConfig) -> Self {
        Provider::OAuth(OAuthProvider::new(config))
    }

    pub fn oidc(config: ProviderConfig) -> Self {
        Provider::Oidc(OidcProvider::new(config))
    }

    pub fn config(&self) -> &ProviderConfig {
        match self {
            Provider::OAuth(p) => &p.config,
            Provider::Oidc(p) => &p.config,
        }
    }

    pub fn id(&self) -> &str {
        &self.config().id
    }

    /// Build the authorization redirect for this provider.
    pub async fn login(
        &self,
        config: &AuthConfig,
        http: &dyn HttpClient,
        request: &Request,
    ) -> Result<Response> {
        match self {
            Provider::OAuth(p) => p.login(config, request),
            Provider::Oidc(p) => p.login(config, http, request).await,
        }
    }

    /// Process the provider callback through to a resolved user.
    pub async fn callback(
        &self,
        config: &AuthConfig,
        http: &dyn HttpClient,
        request: &Request,
    ) -> Result<Response> {
        match self {
            Provider::OAuth(p) => p.callback(config, http, request).await,
            Provider::Oidc(p) => p.callback(config, http, request).await,
        }
    }
}
