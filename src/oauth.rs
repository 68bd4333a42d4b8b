//! OAuth2 authorization-code state machine.
//!
//! `login` builds the authorization redirect with no network traffic;
//! `callback` validates the returned checks, exchanges the code for tokens,
//! resolves the profile, and produces a response carrying the user plus the
//! expiring replacement cookies for every consumed check. Any failed step
//! short-circuits: no partial user is ever returned.

use crate::checks::{self, CheckKind};
use crate::config::AuthConfig;
use crate::cookie::SetCookie;
use crate::error::{Error, Result};
use crate::http::{HttpClient, Request, Response};
use crate::oidc;
use crate::provider::{Endpoint, ProviderConfig, TokenSet};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

/// Plain OAuth2 provider with explicitly configured endpoints.
#[derive(Debug)]
pub struct OAuthProvider {
    pub config: ProviderConfig,
}

impl OAuthProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    /// Build the authorization redirect. No network call occurs here.
    pub fn login(&self, config: &AuthConfig, request: &Request) -> Result<Response> {
        let endpoint = self.config.authorization.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "provider {} has no authorization endpoint",
                self.config.id
            ))
        })?;
        authorization_redirect(config, &self.config, endpoint, &self.config.checks, request)
    }

    /// Process the provider callback: validate checks, exchange the code,
    /// resolve the profile.
    pub async fn callback(
        &self,
        config: &AuthConfig,
        http: &dyn HttpClient,
        request: &Request,
    ) -> Result<Response> {
        reject_provider_error(request)?;

        let verifier = consume_callback_checks(config, &self.config.checks, request)?;

        // Checks are consumed at this point: whatever happens next, the
        // expiring replacement cookies must go out.
        match self.resolve_user(config, http, request, verifier).await {
            Ok(response) => Ok(response),
            Err(e) => Ok(failed_callback(config, &self.config, &self.config.checks, &e)),
        }
    }

    async fn resolve_user(
        &self,
        config: &AuthConfig,
        http: &dyn HttpClient,
        request: &Request,
        verifier: Option<String>,
    ) -> Result<Response> {
        let code = request
            .query_param("code")
            .ok_or_else(|| Error::Provider("missing authorization code".into()))?;

        let token_endpoint = self.config.token.as_ref().ok_or_else(|| {
            Error::Config(format!("provider {} has no token endpoint", self.config.id))
        })?;
        let redirect_uri = callback_redirect_uri(config, &self.config, request);
        let tokens = exchange_code(
            &self.config,
            token_endpoint,
            http,
            &code,
            &redirect_uri,
            verifier.as_deref(),
        )
        .await?;

        let profile = if let Some(userinfo) = &self.config.userinfo {
            fetch_userinfo(http, userinfo, &tokens).await?
        } else if let Some(id_token) = &tokens.id_token {
            oidc::id_token_claims(id_token)?
        } else {
            return Err(Error::Provider(
                "provider returned no profile source (no userinfo endpoint, no id_token)".into(),
            ));
        };

        finish_callback(config, &self.config, &self.config.checks, &profile, &tokens)
    }
}

/// Fail the callback if the provider reported an OAuth error.
pub(crate) fn reject_provider_error(request: &Request) -> Result<()> {
    if let Some(error) = request.query_param("error") {
        let message = match request.query_param("error_description") {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        return Err(Error::Provider(message));
    }
    Ok(())
}

/// Consume state and PKCE for a callback, returning the PKCE verifier to
/// attach to the token exchange (if enabled).
pub(crate) fn consume_callback_checks(
    config: &AuthConfig,
    enabled: &[CheckKind],
    request: &Request,
) -> Result<Option<String>> {
    checks::use_state(
        config,
        enabled.contains(&CheckKind::State),
        request.query_param("state").as_deref(),
        request.cookie(&checks::cookie_name(config, CheckKind::State)),
    )?;

    let verifier = checks::use_pkce(
        config,
        enabled.contains(&CheckKind::Pkce),
        request.cookie(&checks::cookie_name(config, CheckKind::Pkce)),
    )?;

    Ok(verifier.into_option())
}

/// The redirect_uri sent to the provider: an explicit `redirect_uri`
/// authorization param wins, otherwise it is derived from the request
/// origin and the provider's callback route.
pub(crate) fn callback_redirect_uri(
    config: &AuthConfig,
    provider: &ProviderConfig,
    request: &Request,
) -> String {
    provider
        .authorization
        .as_ref()
        .and_then(|endpoint| {
            endpoint
                .params
                .iter()
                .find(|(name, _)| name == "redirect_uri")
                .map(|(_, value)| value.clone())
        })
        .unwrap_or_else(|| {
            format!(
                "{}{}",
                request.origin(),
                provider.resolved_callback_path(&config.base_path)
            )
        })
}

/// Build the authorization redirect response for `endpoint` with the given
/// effective check set. Shared by the OAuth and OIDC machines.
pub(crate) fn authorization_redirect(
    config: &AuthConfig,
    provider: &ProviderConfig,
    endpoint: &Endpoint,
    enabled: &[CheckKind],
    request: &Request,
) -> Result<Response> {
    let redirect_uri = callback_redirect_uri(config, provider, request);

    let mut cookies: Vec<SetCookie> = Vec::new();
    let mut check_params: Vec<(&str, String)> = Vec::new();
    for kind in enabled {
        match kind {
            CheckKind::Pkce => {
                let (challenge, cookie) = checks::create_pkce(config)?;
                check_params.push(("code_challenge", challenge));
                check_params.push(("code_challenge_method", "S256".into()));
                cookies.push(cookie);
            }
            CheckKind::State => {
                let (state, cookie) = checks::create_state(config)?;
                check_params.push(("state", state));
                cookies.push(cookie);
            }
            CheckKind::Nonce => {
                let (nonce, cookie) = checks::create_nonce(config)?;
                check_params.push(("nonce", nonce));
                cookies.push(cookie);
            }
        }
    }

    let mut url = endpoint.url.clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", &provider.client_id);

        let has_param =
            |name: &str| endpoint.params.iter().any(|(param, _)| param == name);
        if !has_param("redirect_uri") {
            query.append_pair("redirect_uri", &redirect_uri);
        }
        if let Some(scope) = &provider.scope {
            if !has_param("scope") {
                query.append_pair("scope", scope);
            }
        }
        for (name, value) in &endpoint.params {
            query.append_pair(name, value);
        }
        for (name, value) in &check_params {
            query.append_pair(name, value);
        }
    }

    tracing::debug!(provider = %provider.id, "built authorization redirect");

    let mut response = Response::redirect_to(url.to_string());
    response.cookies = cookies;
    Ok(response)
}

/// Exchange an authorization code for tokens at the provider's token
/// endpoint, authenticating with client_secret_basic.
pub(crate) async fn exchange_code(
    provider: &ProviderConfig,
    endpoint: &Endpoint,
    http: &dyn HttpClient,
    code: &str,
    redirect_uri: &str,
    verifier: Option<&str>,
) -> Result<TokenSet> {
    let mut form: Vec<(String, String)> = vec![
        ("grant_type".into(), "authorization_code".into()),
        ("code".into(), code.into()),
        ("redirect_uri".into(), redirect_uri.into()),
    ];
    if let Some(verifier) = verifier {
        form.push(("code_verifier".into(), verifier.into()));
    }
    for (name, value) in &endpoint.params {
        form.push((name.clone(), value.clone()));
    }

    let credentials = STANDARD.encode(format!("{}:{}", provider.client_id, provider.client_secret));
    let headers = vec![("Authorization".to_string(), format!("Basic {credentials}"))];

    let fetched = http.post_form(&endpoint.url, &headers, &form).await?;

    // A WWW-Authenticate challenge means the server wants an auth scheme we
    // do not speak; surface it rather than guessing.
    if let Some(challenge) = fetched.header("www-authenticate") {
        return Err(Error::Provider(format!(
            "unhandled token endpoint challenge: {challenge}"
        )));
    }

    let body = fetched.json()?;
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        let message = match body.get("error_description").and_then(Value::as_str) {
            Some(description) => format!("{error}: {description}"),
            None => error.to_string(),
        };
        return Err(Error::Provider(message));
    }
    if !(200..300).contains(&fetched.status) {
        return Err(Error::Provider(format!(
            "token endpoint returned status {}",
            fetched.status
        )));
    }

    Ok(TokenSet::from_json(body))
}

/// Fetch the raw profile from the provider's userinfo endpoint.
pub(crate) async fn fetch_userinfo(
    http: &dyn HttpClient,
    endpoint: &Endpoint,
    tokens: &TokenSet,
) -> Result<Value> {
    let access_token = tokens
        .access_token
        .as_deref()
        .ok_or_else(|| Error::Provider("token response did not include an access token".into()))?;
    let fetched = http.get(&endpoint.url, Some(access_token)).await?;
    if !(200..300).contains(&fetched.status) {
        return Err(Error::Provider(format!(
            "userinfo request failed with status {}",
            fetched.status
        )));
    }
    fetched.json()
}

/// Apply the profile mapping and assemble the post-login response: user,
/// redirect to the post-login page, and expiring replacement cookies for
/// every consumed check.
pub(crate) fn finish_callback(
    config: &AuthConfig,
    provider: &ProviderConfig,
    enabled: &[CheckKind],
    profile: &Value,
    tokens: &TokenSet,
) -> Result<Response> {
    let user = (provider.profile)(profile, tokens)?;
    tracing::info!(provider = %provider.id, user = %user.id, "callback resolved user");

    let mut response = Response::redirect_to(config.session.login_redirect.clone());
    response.cookies = enabled
        .iter()
        .map(|kind| checks::clear_cookie(config, *kind))
        .collect();
    response.user = Some(user);
    Ok(response)
}

/// Error response for a callback that failed after its checks were already
/// consumed. The expiring replacement cookies still go out so the consumed
/// values can never validate again from the browser's cookie jar.
pub(crate) fn failed_callback(
    config: &AuthConfig,
    provider: &ProviderConfig,
    enabled: &[CheckKind],
    error: &Error,
) -> Response {
    tracing::warn!(provider = %provider.id, error = %error, "callback failed after checks were consumed");
    let mut response = Response::from_error(error);
    response.cookies = enabled
        .iter()
        .map(|kind| checks::clear_cookie(config, *kind))
        .collect();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::collections::HashMap;

    fn config() -> AuthConfig {
        AuthConfig::new("test-secret").unwrap()
    }

    fn provider() -> OAuthProvider {
        OAuthProvider::new(
            ProviderConfig::oauth("acme", "client-1", "hunter2")
                .with_authorization(Endpoint::new(
                    "https://idp.example/authorize".parse().unwrap(),
                ))
                .with_token(Endpoint::new("https://idp.example/token".parse().unwrap()))
                .with_userinfo(Endpoint::new("https://idp.example/me".parse().unwrap())),
        )
    }

    fn login_request() -> Request {
        Request::new(
            Method::GET,
            "https://app.example/auth/login/acme".parse().unwrap(),
        )
    }

    fn redirect_params(response: &Response) -> HashMap<String, String> {
        let url: url::Url = response.redirect.as_deref().unwrap().parse().unwrap();
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn login_issues_redirect_with_checks_and_cookies() {
        let response = provider().login(&config(), &login_request()).unwrap();

        assert_eq!(response.status, Some(302));
        let params = redirect_params(&response);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["code_challenge_method"], "S256");
        assert!(params.contains_key("code_challenge"));
        assert!(params.contains_key("state"));
        assert_eq!(response.cookies.len(), 2);
    }

    #[test]
    fn login_derives_redirect_uri_from_request_origin() {
        let response = provider().login(&config(), &login_request()).unwrap();
        let params = redirect_params(&response);
        assert_eq!(
            params["redirect_uri"],
            "https://app.example/auth/callback/acme"
        );
    }

    #[test]
    fn explicit_redirect_uri_param_wins() {
        let p = OAuthProvider::new(
            ProviderConfig::oauth("acme", "c", "s").with_authorization(
                Endpoint::new("https://idp.example/authorize".parse().unwrap())
                    .with_param("redirect_uri", "https://app.example/custom"),
            ),
        );
        let response = p.login(&config(), &login_request()).unwrap();
        let params = redirect_params(&response);
        assert_eq!(params["redirect_uri"], "https://app.example/custom");
    }

    #[test]
    fn login_without_authorization_endpoint_is_a_config_error() {
        let p = OAuthProvider::new(ProviderConfig::oauth("acme", "c", "s"));
        assert!(matches!(
            p.login(&config(), &login_request()).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn scope_is_appended_when_configured() {
        let p = OAuthProvider::new(
            ProviderConfig::oauth("acme", "c", "s")
                .with_scope("read:user")
                .with_authorization(Endpoint::new(
                    "https://idp.example/authorize".parse().unwrap(),
                )),
        );
        let response = p.login(&config(), &login_request()).unwrap();
        assert_eq!(redirect_params(&response)["scope"], "read:user");
    }

    #[test]
    fn failed_callback_still_expires_consumed_checks() {
        let cfg = config();
        let p = provider();
        let response = failed_callback(
            &cfg,
            &p.config,
            &p.config.checks,
            &Error::Provider("token endpoint returned status 500".into()),
        );
        assert!(response.error.is_some());
        assert!(response.user.is_none());
        assert_eq!(response.cookies.len(), 2);
        assert!(response.cookies.iter().all(|c| c.is_expired()));
    }

    #[test]
    fn provider_error_param_short_circuits() {
        let request = Request::new(
            Method::GET,
            "https://app.example/auth/callback/acme?error=access_denied&error_description=nope"
                .parse()
                .unwrap(),
        );
        let err = reject_provider_error(&request).unwrap_err();
        assert!(matches!(err, Error::Provider(ref m) if m.contains("access_denied")));
    }
}
