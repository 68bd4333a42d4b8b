//! OIDC provider state machine.
//!
//! Extends the OAuth machine with issuer discovery, ID-token nonce
//! validation, and ID-token claims as the default profile source. Discovery
//! runs at most once per provider instance and only when endpoints were not
//! explicitly configured.

use crate::checks::{self, CheckKind};
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClient, Request, Response};
use crate::oauth;
use crate::provider::{Endpoint, ProviderConfig};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

/// Subset of the authorization server metadata document the engine uses.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationServer {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default)]
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

impl AuthorizationServer {
    /// Whether the server advertises S256 PKCE support. Absence of the
    /// capability list counts as unsupported.
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_some_and(|methods| methods.iter().any(|m| m == "S256"))
    }
}

/// Endpoints and checks in effect for one login/callback pair.
#[derive(Debug, Clone)]
struct Resolved {
    authorization: Endpoint,
    token: Endpoint,
    checks: Vec<CheckKind>,
}

/// OIDC provider, discovered from its issuer unless endpoints are
/// explicitly configured.
#[derive(Debug)]
pub struct OidcProvider {
    pub config: ProviderConfig,
    metadata: OnceCell<AuthorizationServer>,
}

impl OidcProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            metadata: OnceCell::new(),
        }
    }

    /// Fetch and cache the issuer's metadata document.
    pub async fn initialize_authorization_server(
        &self,
        http: &dyn HttpClient,
    ) -> Result<&AuthorizationServer> {
        let issuer = self.config.issuer.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "provider {} has neither explicit endpoints nor an issuer",
                self.config.id
            ))
        })?;

        self.metadata
            .get_or_try_init(|| async {
                let discovery_url: Url = format!(
                    "{}/.well-known/openid-configuration",
                    issuer.as_str().trim_end_matches('/')
                )
                .parse()
                .map_err(|e| Error::Config(format!("invalid issuer URL: {e}")))?;

                tracing::debug!(provider = %self.config.id, url = %discovery_url, "discovering authorization server");

                let fetched = http.get(&discovery_url, None).await?;
                if !(200..300).contains(&fetched.status) {
                    return Err(Error::Provider(format!(
                        "discovery request failed with status {}",
                        fetched.status
                    )));
                }
                let metadata: AuthorizationServer = serde_json::from_str(&fetched.body)
                    .map_err(|e| Error::Provider(format!("invalid discovery document: {e}")))?;

                if metadata.issuer.trim_end_matches('/') != issuer.as_str().trim_end_matches('/') {
                    return Err(Error::Provider(format!(
                        "discovery issuer mismatch: expected {issuer}, got {}",
                        metadata.issuer
                    )));
                }

                Ok(metadata)
            })
            .await
    }

    /// Endpoints and effective checks, discovering when necessary. PKCE is
    /// downgraded to nonce when the discovered server does not advertise
    /// S256 support.
    async fn resolve(&self, http: &dyn HttpClient) -> Result<Resolved> {
        if let (Some(authorization), Some(token)) = (&self.config.authorization, &self.config.token)
        {
            return Ok(Resolved {
                authorization: authorization.clone(),
                token: token.clone(),
                checks: self.config.checks.clone(),
            });
        }

        let metadata = self.initialize_authorization_server(http).await?;

        let mut effective_checks = self.config.checks.clone();
        if effective_checks.contains(&CheckKind::Pkce) && !metadata.supports_s256() {
            tracing::warn!(
                provider = %self.config.id,
                "authorization server does not advertise S256, downgrading pkce to nonce"
            );
            effective_checks.retain(|kind| *kind != CheckKind::Pkce);
            if !effective_checks.contains(&CheckKind::Nonce) {
                effective_checks.push(CheckKind::Nonce);
            }
        }

        Ok(Resolved {
            authorization: self
                .config
                .authorization
                .clone()
                .unwrap_or_else(|| Endpoint::new(metadata.authorization_endpoint.clone())),
            token: self
                .config
                .token
                .clone()
                .unwrap_or_else(|| Endpoint::new(metadata.token_endpoint.clone())),
            checks: effective_checks,
        })
    }

    /// Build the authorization redirect, discovering endpoints first when
    /// they were not explicitly configured.
    pub async fn login(
        &self,
        config: &AuthConfig,
        http: &dyn HttpClient,
        request: &Request,
    ) -> Result<Response> {
        let resolved = self.resolve(http).await?;
        oauth::authorization_redirect(
            config,
            &self.config,
            &resolved.authorization,
            &resolved.checks,
            request,
        )
    }

    /// Process the callback: validate state/PKCE, exchange the code,
    /// validate the ID-token nonce, and resolve the profile from the
    /// ID-token claims (or an explicitly configured userinfo endpoint).
    pub async fn callback(
        &self,
        config: &AuthConfig,
        http: &dyn HttpClient,
        request: &Request,
    ) -> Result<Response> {
        oauth::reject_provider_error(request)?;

        let resolved = self.resolve(http).await?;
        let verifier = oauth::consume_callback_checks(config, &resolved.checks, request)?;

        // State and PKCE are consumed at this point: whatever happens next,
        // the expiring replacement cookies must go out.
        match self
            .resolve_user(config, http, request, &resolved, verifier)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => Ok(oauth::failed_callback(
                config,
                &self.config,
                &resolved.checks,
                &e,
            )),
        }
    }

    async fn resolve_user(
        &self,
        config: &AuthConfig,
        http: &dyn HttpClient,
        request: &Request,
        resolved: &Resolved,
        verifier: Option<String>,
    ) -> Result<Response> {
        let expected_nonce = checks::use_nonce(
            config,
            resolved.checks.contains(&CheckKind::Nonce),
            request.cookie(&checks::cookie_name(config, CheckKind::Nonce)),
        )?
        .into_option();

        let code = request
            .query_param("code")
            .ok_or_else(|| Error::Provider("missing authorization code".into()))?;
        let redirect_uri = oauth::callback_redirect_uri(config, &self.config, request);
        let tokens = oauth::exchange_code(
            &self.config,
            &resolved.token,
            http,
            &code,
            &redirect_uri,
            verifier.as_deref(),
        )
        .await?;

        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| Error::Provider("token response did not include an id_token".into()))?;
        let claims = id_token_claims(id_token)?;

        if let Some(expected) = expected_nonce {
            let claim = claims.get("nonce").and_then(Value::as_str);
            if claim != Some(expected.as_str()) {
                return Err(Error::InvalidCheck(CheckKind::Nonce));
            }
        }

        let profile = if let Some(userinfo) = &self.config.userinfo {
            oauth::fetch_userinfo(http, userinfo, &tokens).await?
        } else {
            claims
        };

        oauth::finish_callback(config, &self.config, &resolved.checks, &profile, &tokens)
    }
}

/// Decode the claims segment of a JWT ID token.
///
/// Signature verification is delegated to the TLS channel the token arrived
/// over; the claims are still validated for nonce and shape.
pub(crate) fn id_token_claims(id_token: &str) -> Result<Value> {
    let mut parts = id_token.split('.');
    let payload = match (parts.next(), parts.next()) {
        (Some(_), Some(payload)) => payload,
        _ => return Err(Error::Provider("malformed id_token".into())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| Error::Provider("malformed id_token payload".into()))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::Provider("malformed id_token claims".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Fetched;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Stub transport serving canned responses keyed by URL.
    struct StubHttp {
        responses: HashMap<String, String>,
    }

    #[async_trait]
    impl HttpClient for StubHttp {
        async fn post_form(
            &self,
            url: &Url,
            _headers: &[(String, String)],
            _form: &[(String, String)],
        ) -> Result<Fetched> {
            self.get(url, None).await
        }

        async fn get(&self, url: &Url, _bearer: Option<&str>) -> Result<Fetched> {
            let body = self
                .responses
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| Error::Network(format!("no stub for {url}")))?;
            Ok(Fetched {
                status: 200,
                headers: HashMap::new(),
                body,
            })
        }
    }

    fn discovery_doc(code_challenge_methods: Option<&[&str]>) -> String {
        let mut doc = serde_json::json!({
            "issuer": "https://idp.example",
            "authorization_endpoint": "https://idp.example/authorize",
            "token_endpoint": "https://idp.example/token",
            "userinfo_endpoint": "https://idp.example/me",
        });
        if let Some(methods) = code_challenge_methods {
            doc["code_challenge_methods_supported"] = serde_json::json!(methods);
        }
        doc.to_string()
    }

    fn stub_with_discovery(doc: String) -> StubHttp {
        let mut responses = HashMap::new();
        responses.insert(
            "https://idp.example/.well-known/openid-configuration".to_string(),
            doc,
        );
        StubHttp { responses }
    }

    fn oidc_provider() -> OidcProvider {
        OidcProvider::new(ProviderConfig::oidc(
            "idp",
            "client-1",
            "hunter2",
            "https://idp.example".parse().unwrap(),
        ))
    }

    fn login_request() -> Request {
        Request::new(
            http::Method::GET,
            "https://app.example/auth/login/idp".parse().unwrap(),
        )
    }

    #[test]
    fn id_token_claims_decodes_the_middle_segment() {
        let claims = serde_json::json!({"sub": "42", "nonce": "n-1"});
        let token = format!(
            "e30.{}.sig",
            URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes())
        );
        let decoded = id_token_claims(&token).unwrap();
        assert_eq!(decoded["sub"], "42");
        assert_eq!(decoded["nonce"], "n-1");
    }

    #[test]
    fn id_token_claims_rejects_garbage() {
        assert!(id_token_claims("no-dots-here").is_err());
        assert!(id_token_claims("a.!!!.c").is_err());
    }

    #[test]
    fn s256_support_requires_advertisement() {
        let with: AuthorizationServer =
            serde_json::from_str(&discovery_doc(Some(&["plain", "S256"]))).unwrap();
        assert!(with.supports_s256());

        let without: AuthorizationServer =
            serde_json::from_str(&discovery_doc(Some(&["plain"]))).unwrap();
        assert!(!without.supports_s256());

        let absent: AuthorizationServer = serde_json::from_str(&discovery_doc(None)).unwrap();
        assert!(!absent.supports_s256());
    }

    #[tokio::test]
    async fn login_uses_discovered_endpoints() {
        let provider = oidc_provider();
        let http = stub_with_discovery(discovery_doc(Some(&["S256"])));

        let response = provider
            .login(&AuthConfig::new("s").unwrap(), &http, &login_request())
            .await
            .unwrap();

        let redirect = response.redirect.unwrap();
        assert!(redirect.starts_with("https://idp.example/authorize?"));
        assert!(redirect.contains("code_challenge="));
        assert!(redirect.contains("nonce="));
        // pkce + state + nonce
        assert_eq!(response.cookies.len(), 3);
    }

    #[tokio::test]
    async fn pkce_downgrades_to_nonce_without_s256() {
        let provider = oidc_provider();
        let http = stub_with_discovery(discovery_doc(Some(&["plain"])));

        let response = provider
            .login(&AuthConfig::new("s").unwrap(), &http, &login_request())
            .await
            .unwrap();

        let redirect = response.redirect.unwrap();
        assert!(!redirect.contains("code_challenge="));
        assert!(redirect.contains("nonce="));
        assert_eq!(response.cookies.len(), 2);
    }

    #[tokio::test]
    async fn discovery_issuer_mismatch_is_fatal() {
        let provider = oidc_provider();
        let doc = serde_json::json!({
            "issuer": "https://evil.example",
            "authorization_endpoint": "https://idp.example/authorize",
            "token_endpoint": "https://idp.example/token",
        })
        .to_string();
        let http = stub_with_discovery(doc);

        let err = provider
            .login(&AuthConfig::new("s").unwrap(), &http, &login_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(ref m) if m.contains("issuer mismatch")));
    }

    #[tokio::test]
    async fn explicit_endpoints_skip_discovery() {
        let provider = OidcProvider::new(
            ProviderConfig::oidc(
                "idp",
                "client-1",
                "hunter2",
                "https://idp.example".parse().unwrap(),
            )
            .with_authorization(Endpoint::new(
                "https://idp.example/authorize".parse().unwrap(),
            ))
            .with_token(Endpoint::new("https://idp.example/token".parse().unwrap())),
        );
        // Empty stub: any network call would fail the test.
        let http = StubHttp {
            responses: HashMap::new(),
        };

        let response = provider
            .login(&AuthConfig::new("s").unwrap(), &http, &login_request())
            .await
            .unwrap();
        assert_eq!(response.status, Some(302));
    }
}
