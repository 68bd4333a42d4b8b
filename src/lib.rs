//! # latchkey
//!
//! An embeddable OAuth2/OIDC authentication engine. Given an abstract
//! HTTP request, it drives authorization-code flows end to end: login
//! redirect, anti-forgery checks (state, PKCE, nonce), code-for-token
//! exchange, profile resolution, and encrypted cookie sessions.
//!
//! It is consumed as a library by a host web server. The host translates
//! its framework's request into a [`Request`], calls [`Auth::handle`], and
//! applies the returned [`Response`] descriptor (status, redirect, cookies)
//! itself; the engine never writes to a socket.
//!
//! ## Features
//!
//! - **OAuth2 + OIDC providers**: authorization-code flow with PKCE, state,
//!   and nonce checks, plus issuer discovery for OIDC
//! - **Encrypted sessions**: access/refresh cookies sealed with an
//!   HKDF-derived AES-256-GCM cipher, with sliding refresh
//! - **Pluggable behavior**: session storage hooks, request hooks, and the
//!   outbound HTTP transport are all traits
//! - **Stateless**: immutable configuration only; safe concurrent handling
//!   with no locks
//!
//! ## Example
//!
//! ```rust,no_run
//! use latchkey::{Auth, AuthConfig, Endpoint, Provider, ProviderConfig};
//!
//! # fn example() -> latchkey::Result<()> {
//! let auth = Auth::builder()
//!     .config(AuthConfig::new("a long random secret")?)
//!     .provider(Provider::oidc(ProviderConfig::oidc(
//!         "acme",
//!         "client-id",
//!         "client-secret",
//!         "https://idp.example".parse().unwrap(),
//!     )))
//!     .build()?;
//!
//! // let response = auth.handle(&request).await;
//! # Ok(())
//! # }
//! ```

pub mod checks;
pub mod config;
pub mod cookie;
pub mod error;
pub mod http;
pub mod jwt;
pub mod oauth;
pub mod oidc;
pub mod provider;
pub mod routes;
pub mod session;

pub use checks::{CheckKind, CheckValue};
pub use config::{AuthConfig, SessionOptions};
pub use cookie::{CookieAttributes, Priority, SameSite, SetCookie};
pub use error::{Error, Result};
pub use http::{Fetched, HttpClient, Request, ReqwestClient, Response};
pub use oauth::OAuthProvider;
pub use oidc::{AuthorizationServer, OidcProvider};
pub use provider::{Endpoint, Provider, ProviderConfig, TokenSet, User};
pub use routes::{Auth, AuthBuilder, NoRequestHooks, RequestHooks, Route, RouteHandler};
pub use session::{DefaultSessionHooks, SessionHooks};
