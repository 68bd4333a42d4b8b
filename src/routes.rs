//! Route dispatch: ties requests to provider and session handlers.
//!
//! The route table is built once at construction and keyed by normalized
//! path with an exact match (never a prefix match). Every handler failure
//! is caught at this boundary and converted into an `{error}` response; the
//! dispatcher never lets a failure propagate to the host.

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClient, Request, ReqwestClient, Response};
use crate::provider::Provider;
use crate::session::{self, DefaultSessionHooks, SessionHooks};
use async_trait::async_trait;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a matched route does.
#[derive(Debug, Clone)]
pub enum RouteHandler {
    /// Provider login (authorization redirect) for the provider id.
    Login(String),
    /// Provider callback for the provider id.
    Callback(String),
    /// Session logout.
    Logout,
}

/// One entry in the dispatch table.
#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub methods: Vec<Method>,
    pub handler: RouteHandler,
}

/// Hooks run around the matched handler. `before_handle` may short-circuit
/// with a response; `after_handle` sees the merged response last.
#[async_trait]
pub trait RequestHooks: Send + Sync {
    async fn before_handle(&self, _request: &Request) -> Result<Option<Response>> {
        Ok(None)
    }

    async fn after_handle(&self, _request: &Request, response: Response) -> Result<Response> {
        Ok(response)
    }
}

/// No-op hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRequestHooks;

#[async_trait]
impl RequestHooks for NoRequestHooks {}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// The authentication engine: immutable configuration, providers, and the
/// dispatch table. Stateless between requests, safe to share across tasks.
pub struct Auth {
    config: AuthConfig,
    providers: Vec<Provider>,
    routes: HashMap<String, Route>,
    http: Arc<dyn HttpClient>,
    session_hooks: Arc<dyn SessionHooks>,
    request_hooks: Arc<dyn RequestHooks>,
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("config", &self.config)
            .field("providers", &self.providers)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl Auth {
    pub fn builder() -> AuthBuilder {
        AuthBuilder::default()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// Decode the session carried by the request, if any.
    pub fn session(&self, request: &Request) -> Option<Value> {
        session::session_from_request(&self.config, request)
    }

    /// Handle a request end to end. Infallible by contract: failures become
    /// `{error}` responses.
    pub async fn handle(&self, request: &Request) -> Response {
        // Sliding refresh runs for every request; its failures are benign.
        let base = match session::handle_request(&self.config, self.session_hooks.as_ref(), request)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if !e.is_benign_decode() {
                    tracing::warn!(error = %e, "session refresh failed");
                }
                Response::default()
            }
        };

        let path = normalize_path(request.url.path());
        let Some(route) = self.routes.get(&path) else {
            return base;
        };
        if !route.methods.contains(&request.method) {
            return base;
        }

        let handled = match self.request_hooks.before_handle(request).await {
            Ok(Some(short_circuit)) => Ok(short_circuit),
            Ok(None) => self.dispatch(&route.handler, request).await,
            Err(e) => Err(e),
        };

        let mut response = match handled {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, path = %path, "handler failed");
                Response::from_error(&e)
            }
        };

        // Thread the handler result through the session engine: a resolved
        // user without a session gets one created here.
        if response.user.is_some() && response.session.is_none() && response.error.is_none() {
            response = self.create_session(response).await;
        }

        let merged = base.merge(response);
        match self.request_hooks.after_handle(request, merged).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "after_handle hook failed");
                Response::from_error(&e)
            }
        }
    }

    async fn dispatch(&self, handler: &RouteHandler, request: &Request) -> Result<Response> {
        match handler {
            RouteHandler::Login(id) => {
                let provider = self
                    .provider(id)
                    .ok_or_else(|| Error::Internal(format!("unknown provider {id}")))?;
                provider
                    .login(&self.config, self.http.as_ref(), request)
                    .await
            }
            RouteHandler::Callback(id) => {
                let provider = self
                    .provider(id)
                    .ok_or_else(|| Error::Internal(format!("unknown provider {id}")))?;
                provider
                    .callback(&self.config, self.http.as_ref(), request)
                    .await
            }
            RouteHandler::Logout => {
                Ok(session::logout(&self.config, self.session_hooks.as_ref(), request).await)
            }
        }
    }

    async fn create_session(&self, mut response: Response) -> Response {
        let Some(user) = response.user.as_ref() else {
            return response;
        };
        let outcome = match self.session_hooks.create_session(user).await {
            Ok(Some(session)) => {
                session::create_cookies_from_session(&self.config, &session)
                    .map(|cookies| Some((session, cookies)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some((session, cookies))) => {
                response.cookies.extend(cookies);
                response.session = Some(session);
                response
            }
            Ok(None) => response,
            Err(e) => {
                tracing::warn!(error = %e, "session creation failed");
                // Keep only the already-validated cookies (expiring check
                // replacements); no partial session is committed.
                let cookies = std::mem::take(&mut response.cookies);
                let mut error_response = Response::from_error(&e);
                error_response.cookies = cookies;
                error_response
            }
        }
    }
}

/// Builder for [`Auth`], in the spirit of the usual server builders.
#[derive(Default)]
pub struct AuthBuilder {
    config: Option<AuthConfig>,
    providers: Vec<Provider>,
    http: Option<Arc<dyn HttpClient>>,
    session_hooks: Option<Arc<dyn SessionHooks>>,
    request_hooks: Option<Arc<dyn RequestHooks>>,
}

impl AuthBuilder {
    pub fn config(mut self, config: AuthConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn session_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.session_hooks = Some(hooks);
        self
    }

    pub fn request_hooks(mut self, hooks: Arc<dyn RequestHooks>) -> Self {
        self.request_hooks = Some(hooks);
        self
    }

    /// Validate the configuration and freeze the route table.
    pub fn build(self) -> Result<Auth> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("missing engine configuration".into()))?;

        let mut routes: HashMap<String, Route> = HashMap::new();
        let mut add_route = |path: String, handler: RouteHandler| -> Result<()> {
            let path = normalize_path(&path);
            if routes.contains_key(&path) {
                return Err(Error::Config(format!("duplicate route path {path}")));
            }
            routes.insert(
                path.clone(),
                Route {
                    path,
                    methods: vec![Method::GET, Method::POST],
                    handler,
                },
            );
            Ok(())
        };

        for provider in &self.providers {
            let id = provider.id().to_string();
            if self
                .providers
                .iter()
                .filter(|p| p.id() == id)
                .count()
                > 1
            {
                return Err(Error::Config(format!("duplicate provider id {id}")));
            }
            add_route(
                provider.config().resolved_login_path(&config.base_path),
                RouteHandler::Login(id.clone()),
            )?;
            add_route(
                provider.config().resolved_callback_path(&config.base_path),
                RouteHandler::Callback(id),
            )?;
        }
        add_route(format!("{}/logout", config.base_path), RouteHandler::Logout)?;

        Ok(Auth {
            config,
            providers: self.providers,
            routes,
            http: self.http.unwrap_or_else(|| Arc::new(ReqwestClient::default())),
            session_hooks: self
                .session_hooks
                .unwrap_or_else(|| Arc::new(DefaultSessionHooks)),
            request_hooks: self
                .request_hooks
                .unwrap_or_else(|| Arc::new(NoRequestHooks)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Endpoint, ProviderConfig};

    fn engine() -> Auth {
        Auth::builder()
            .config(AuthConfig::new("test-secret").unwrap())
            .provider(Provider::oauth(
                ProviderConfig::oauth("acme", "client-1", "hunter2")
                    .with_authorization(Endpoint::new(
                        "https://idp.example/authorize".parse().unwrap(),
                    ))
                    .with_token(Endpoint::new("https://idp.example/token".parse().unwrap()))
                    .with_userinfo(Endpoint::new("https://idp.example/me".parse().unwrap())),
            ))
            .build()
            .unwrap()
    }

    fn request(path: &str) -> Request {
        Request::new(
            Method::GET,
            format!("https://app.example{path}").parse().unwrap(),
        )
    }

    #[test]
    fn duplicate_provider_ids_fail_at_build() {
        let result = Auth::builder()
            .config(AuthConfig::new("s").unwrap())
            .provider(Provider::oauth(ProviderConfig::oauth("a", "c", "s")))
            .provider(Provider::oauth(ProviderConfig::oauth("a", "c", "s")))
            .build();
        assert!(matches!(result.unwrap_err(), Error::Config(_)));
    }

    #[test]
    fn missing_config_fails_at_build() {
        assert!(matches!(
            Auth::builder().build().unwrap_err(),
            Error::Config(_)
        ));
    }

    #[tokio::test]
    async fn unknown_path_yields_empty_response() {
        let res = engine().handle(&request("/somewhere/else")).await;
        assert!(res.is_empty());
    }

    #[tokio::test]
    async fn method_mismatch_is_not_dispatched() {
        let req = Request::new(
            Method::DELETE,
            "https://app.example/auth/login/acme".parse().unwrap(),
        );
        let res = engine().handle(&req).await;
        assert!(res.is_empty());
    }

    #[tokio::test]
    async fn login_route_is_dispatched_with_trailing_slash() {
        let res = engine().handle(&request("/auth/login/acme/")).await;
        assert_eq!(res.status, Some(302));
        assert_eq!(res.cookies.len(), 2);
    }

    #[tokio::test]
    async fn callback_without_state_becomes_an_error_response() {
        let res = engine().handle(&request("/auth/callback/acme?code=x")).await;
        assert!(res.error.is_some());
        assert!(res.user.is_none());
        assert!(res.session.is_none());
    }

    #[tokio::test]
    async fn logout_route_is_registered_by_default() {
        let res = engine().handle(&request("/auth/logout")).await;
        assert_eq!(res.status, Some(302));
        assert_eq!(res.cookies.len(), 2);
        assert!(res.cookies.iter().all(|c| c.is_expired()));
    }

    #[tokio::test]
    async fn before_hook_short_circuits_the_handler() {
        struct Deny;
        #[async_trait]
        impl RequestHooks for Deny {
            async fn before_handle(&self, _request: &Request) -> Result<Option<Response>> {
                Ok(Some(Response {
                    status: Some(403),
                    ..Default::default()
                }))
            }
        }

        let auth = Auth::builder()
            .config(AuthConfig::new("s").unwrap())
            .provider(Provider::oauth(
                ProviderConfig::oauth("acme", "c", "s").with_authorization(Endpoint::new(
                    "https://idp.example/authorize".parse().unwrap(),
                )),
            ))
            .request_hooks(Arc::new(Deny))
            .build()
            .unwrap();

        let res = auth.handle(&request("/auth/login/acme")).await;
        assert_eq!(res.status, Some(403));
        assert!(res.cookies.is_empty());
    }
}
