//! Session engine: encrypted access/refresh cookies and their lifecycle.
//!
//! Sessions are application-defined JSON payloads; the engine never
//! inspects their fields beyond presence. The access cookie authorizes a
//! request, the refresh cookie only mints new access cookies via the
//! sliding-refresh path. Decode failures are "not logged in", never fatal.

use crate::config::AuthConfig;
use crate::cookie::SetCookie;
use crate::error::Result;
use crate::http::{Request, Response};
use crate::jwt;
use crate::provider::User;
use async_trait::async_trait;
use serde_json::Value;

/// Cookie purpose suffix of the access token.
pub const ACCESS_TOKEN_PURPOSE: &str = "access-token";
/// Cookie purpose suffix of the refresh token.
pub const REFRESH_TOKEN_PURPOSE: &str = "refresh-token";

/// Pluggable session behavior. Defaults treat the user as the session
/// verbatim and refresh by re-issuing the refresh payload; hosts override
/// to consult external storage.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Turn an authenticated user into a session payload. Returning `None`
    /// refuses the session (no cookies are issued).
    async fn create_session(&self, user: &User) -> Result<Option<Value>> {
        Ok(Some(serde_json::to_value(user)?))
    }

    /// Mint a new session from a decoded refresh payload. Returning `None`
    /// declines the refresh.
    async fn refresh_session(&self, refresh: Value) -> Result<Option<Value>> {
        Ok(Some(refresh))
    }

    /// Revoke any server-side state for a session during logout. Called
    /// with whatever decoded successfully; failures are logged, never
    /// surfaced, because logout must always succeed.
    async fn invalidate_session(
        &self,
        _access: Option<Value>,
        _refresh: Option<Value>,
    ) -> Result<()> {
        Ok(())
    }
}

/// The default verbatim-session behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSessionHooks;

#[async_trait]
impl SessionHooks for DefaultSessionHooks {}

fn access_cookie_name(config: &AuthConfig) -> String {
    config.purpose_cookie_name(ACCESS_TOKEN_PURPOSE)
}

fn refresh_cookie_name(config: &AuthConfig) -> String {
    config.purpose_cookie_name(REFRESH_TOKEN_PURPOSE)
}

fn session_cookie(config: &AuthConfig, name: String, value: String, max_age: i64) -> SetCookie {
    let mut attributes = config.base_cookie_attributes();
    attributes.max_age = Some(max_age);
    SetCookie {
        name,
        value,
        attributes,
    }
}

fn expired_cookie(config: &AuthConfig, name: String) -> SetCookie {
    session_cookie(config, name, String::new(), 0)
}

/// Encrypt a session into its access and refresh cookies.
pub fn create_cookies_from_session(config: &AuthConfig, session: &Value) -> Result<Vec<SetCookie>> {
    let access = jwt::encode(session, &config.secret, Some(config.session.access_max_age))?;
    let refresh = jwt::encode(session, &config.secret, Some(config.session.refresh_max_age))?;
    Ok(vec![
        session_cookie(
            config,
            access_cookie_name(config),
            access,
            config.session.access_max_age,
        ),
        session_cookie(
            config,
            refresh_cookie_name(config),
            refresh,
            config.session.refresh_max_age,
        ),
    ])
}

/// Decode the session carried by the request's access cookie, if any.
pub fn session_from_request(config: &AuthConfig, request: &Request) -> Option<Value> {
    let token = request.cookie(&access_cookie_name(config))?;
    jwt::decode(token, &config.secret).ok()
}

/// Sliding-refresh path.
///
/// A decodable access cookie, or no refresh cookie at all, requires no
/// action. Only when the refresh cookie must carry the session alone (the
/// access cookie is absent, expired, or tampered) and decodes successfully
/// does the refresh hook run and new cookies get emitted.
pub async fn handle_request(
    config: &AuthConfig,
    hooks: &dyn SessionHooks,
    request: &Request,
) -> Result<Response> {
    let access_valid = request
        .cookie(&access_cookie_name(config))
        .is_some_and(|token| jwt::decode::<Value>(token, &config.secret).is_ok());
    if access_valid {
        return Ok(Response::default());
    }
    let Some(refresh_token) = request.cookie(&refresh_cookie_name(config)) else {
        return Ok(Response::default());
    };

    let Ok(refresh_payload) = jwt::decode::<Value>(refresh_token, &config.secret) else {
        // Undecodable refresh token is "not logged in", not an error.
        return Ok(Response::default());
    };

    let Some(session) = hooks.refresh_session(refresh_payload).await? else {
        return Ok(Response::default());
    };

    tracing::debug!("refreshed session from refresh cookie");

    let mut response = Response::default();
    response.cookies = create_cookies_from_session(config, &session)?;
    response.session = Some(session);
    Ok(response)
}

/// Log the request's session out.
///
/// Both cookies are decoded best-effort, the invalidation hook runs with
/// whatever decoded, and the response unconditionally zeroes both cookies
/// and redirects. This path succeeds even when every decode fails.
pub async fn logout(
    config: &AuthConfig,
    hooks: &dyn SessionHooks,
    request: &Request,
) -> Response {
    let access = request
        .cookie(&access_cookie_name(config))
        .and_then(|token| jwt::decode(token, &config.secret).ok());
    let refresh = request
        .cookie(&refresh_cookie_name(config))
        .and_then(|token| jwt::decode(token, &config.secret).ok());

    if let Err(e) = hooks.invalidate_session(access, refresh).await {
        tracing::warn!(error = %e, "session invalidation hook failed during logout");
    }

    let mut response = Response::redirect_to(config.session.logout_redirect.clone());
    response.cookies = vec![
        expired_cookie(config, access_cookie_name(config)),
        expired_cookie(config, refresh_cookie_name(config)),
    ];
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn config() -> AuthConfig {
        AuthConfig::new("test-secret").unwrap()
    }

    fn request() -> Request {
        Request::new(Method::GET, "https://app.example/dashboard".parse().unwrap())
    }

    fn session_value() -> Value {
        serde_json::json!({"id": "42", "email": "a@b.com"})
    }

    #[test]
    fn cookies_carry_configured_lifetimes() {
        let cfg = config();
        let cookies = create_cookies_from_session(&cfg, &session_value()).unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "__Secure-latchkey.access-token");
        assert_eq!(cookies[0].attributes.max_age, Some(3600));
        assert_eq!(cookies[1].name, "__Secure-latchkey.refresh-token");
        assert_eq!(cookies[1].attributes.max_age, Some(604_800));
    }

    #[tokio::test]
    async fn valid_access_cookie_requires_no_action() {
        let cfg = config();
        let cookies = create_cookies_from_session(&cfg, &session_value()).unwrap();
        let req = request().with_cookie(cookies[0].name.clone(), cookies[0].value.clone());

        let res = handle_request(&cfg, &DefaultSessionHooks, &req).await.unwrap();
        assert!(res.is_empty());
    }

    #[tokio::test]
    async fn no_cookies_requires_no_action() {
        let cfg = config();
        let res = handle_request(&cfg, &DefaultSessionHooks, &request())
            .await
            .unwrap();
        assert!(res.is_empty());
    }

    #[tokio::test]
    async fn lone_refresh_cookie_mints_new_session_cookies() {
        let cfg = config();
        let cookies = create_cookies_from_session(&cfg, &session_value()).unwrap();
        let req = request().with_cookie(cookies[1].name.clone(), cookies[1].value.clone());

        let res = handle_request(&cfg, &DefaultSessionHooks, &req).await.unwrap();
        assert_eq!(res.cookies.len(), 2);
        assert_eq!(res.session, Some(session_value()));
        assert!(!res.cookies[0].is_expired());
    }

    #[tokio::test]
    async fn undecodable_access_cookie_falls_back_to_refresh() {
        let cfg = config();
        let cookies = create_cookies_from_session(&cfg, &session_value()).unwrap();
        let req = request()
            .with_cookie(access_cookie_name(&cfg), "tampered".to_string())
            .with_cookie(cookies[1].name.clone(), cookies[1].value.clone());

        let res = handle_request(&cfg, &DefaultSessionHooks, &req).await.unwrap();
        assert_eq!(res.cookies.len(), 2);
        assert_eq!(res.session, Some(session_value()));
    }

    #[tokio::test]
    async fn undecodable_refresh_cookie_is_benign() {
        let cfg = config();
        let req = request().with_cookie(
            refresh_cookie_name(&cfg),
            "lk1.not.a-real-token".to_string(),
        );
        let res = handle_request(&cfg, &DefaultSessionHooks, &req).await.unwrap();
        assert!(res.is_empty());
    }

    #[tokio::test]
    async fn refresh_hook_can_decline() {
        struct Declining;
        #[async_trait]
        impl SessionHooks for Declining {
            async fn refresh_session(&self, _refresh: Value) -> Result<Option<Value>> {
                Ok(None)
            }
        }

        let cfg = config();
        let cookies = create_cookies_from_session(&cfg, &session_value()).unwrap();
        let req = request().with_cookie(cookies[1].name.clone(), cookies[1].value.clone());

        let res = handle_request(&cfg, &Declining, &req).await.unwrap();
        assert!(res.is_empty());
    }

    #[tokio::test]
    async fn logout_with_no_cookies_still_succeeds() {
        let cfg = config();
        let res = logout(&cfg, &DefaultSessionHooks, &request()).await;
        assert_eq!(res.status, Some(302));
        assert_eq!(res.cookies.len(), 2);
        assert!(res.cookies.iter().all(SetCookie::is_expired));
    }

    #[tokio::test]
    async fn logout_passes_decoded_payloads_to_the_hook() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recording {
            seen: Mutex<Option<(Option<Value>, Option<Value>)>>,
        }
        #[async_trait]
        impl SessionHooks for Recording {
            async fn invalidate_session(
                &self,
                access: Option<Value>,
                refresh: Option<Value>,
            ) -> Result<()> {
                *self.seen.lock().unwrap() = Some((access, refresh));
                Ok(())
            }
        }

        let cfg = config();
        let cookies = create_cookies_from_session(&cfg, &session_value()).unwrap();
        let req = request()
            .with_cookie(cookies[0].name.clone(), cookies[0].value.clone())
            .with_cookie(cookies[1].name.clone(), "tampered".to_string());

        let hooks = Recording::default();
        let res = logout(&cfg, &hooks, &req).await;
        assert_eq!(res.status, Some(302));

        let (access, refresh) = hooks.seen.lock().unwrap().take().unwrap();
        assert_eq!(access, Some(session_value()));
        assert_eq!(refresh, None);
    }

    #[test]
    fn session_from_request_decodes_the_access_cookie() {
        let cfg = config();
        let cookies = create_cookies_from_session(&cfg, &session_value()).unwrap();
        let req = request().with_cookie(cookies[0].name.clone(), cookies[0].value.clone());
        assert_eq!(session_from_request(&cfg, &req), Some(session_value()));
        assert_eq!(session_from_request(&cfg, &request()), None);
    }
}
