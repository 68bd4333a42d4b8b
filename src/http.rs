//! Abstract HTTP model shared with host adapters.
//!
//! The engine never touches a live socket: hosts construct a [`Request`]
//! from their framework's request object and translate the returned
//! [`Response`] descriptor back. Outbound provider calls (token exchange,
//! userinfo, discovery) go through the [`HttpClient`] trait so hosts can
//! reuse their own client and tests can stub the network.

use crate::cookie::{self, SetCookie};
use crate::error::{Error, Result};
use crate::provider::User;
use async_trait::async_trait;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// Read-only view of an inbound request, constructed once per call by the
/// host adapter.
#[derive(Debug, Clone)]
pub struct Request {
    /// Absolute URL including path and query.
    pub url: Url,
    pub method: Method,
    pub headers: HashMap<String, String>,
    /// Cookie name → value, already parsed from the Cookie header.
    pub cookies: HashMap<String, String>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HashMap::new(),
            cookies: HashMap::new(),
        }
    }

    /// Attach headers; a `Cookie` header is parsed into the cookie map.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        for (name, value) in &headers {
            if name.eq_ignore_ascii_case("cookie") {
                self.cookies.extend(cookie::parse(value));
            }
        }
        self.headers = headers;
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Origin of the request URL (`scheme://host[:port]`).
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }
}

/// Response descriptor returned to the host adapter.
///
/// Internal stages populate fields incrementally; the dispatcher performs
/// the final merge before handing the response back.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: Option<u16>,
    pub redirect: Option<String>,
    pub cookies: Vec<SetCookie>,
    pub user: Option<User>,
    pub session: Option<Value>,
    pub body: Option<Value>,
    pub error: Option<String>,
}

impl Response {
    /// A 302 redirect to `target`.
    pub fn redirect_to(target: impl Into<String>) -> Self {
        Self {
            status: Some(302),
            redirect: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn from_error(error: &Error) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.redirect.is_none()
            && self.cookies.is_empty()
            && self.user.is_none()
            && self.session.is_none()
            && self.body.is_none()
            && self.error.is_none()
    }

    /// Overlay `other` on top of this response. Scalar fields from `other`
    /// win; cookies accumulate in emission order.
    pub fn merge(mut self, other: Response) -> Response {
        self.status = other.status.or(self.status);
        self.redirect = other.redirect.or(self.redirect);
        self.cookies.extend(other.cookies);
        self.user = other.user.or(self.user);
        self.session = other.session.or(self.session);
        self.body = other.body.or(self.body);
        self.error = other.error.or(self.error);
        self
    }
}

/// Raw result of an outbound provider call.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status: u16,
    /// Header name (lowercased) → value.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Fetched {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.body)
            .map_err(|e| Error::Provider(format!("invalid JSON response: {e}")))
    }
}

/// Outbound HTTP used for token exchange, userinfo, and discovery.
///
/// Timeouts and retries are the implementation's concern; the engine
/// propagates failures as request-level errors and never retries.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// POST a form body, with optional extra headers.
    async fn post_form(
        &self,
        url: &Url,
        headers: &[(String, String)],
        form: &[(String, String)],
    ) -> Result<Fetched>;

    /// GET a resource, optionally with a bearer token.
    async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<Fetched>;
}

/// Default [`HttpClient`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn collect_headers(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post_form(
        &self,
        url: &Url,
        headers: &[(String, String)],
        form: &[(String, String)],
    ) -> Result<Fetched> {
        let mut request = self.client.post(url.clone()).form(form);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Fetched {
            status,
            headers,
            body,
        })
    }

    async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<Fetched> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Fetched {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_is_parsed_into_the_map() {
        let mut headers = HashMap::new();
        headers.insert("Cookie".to_string(), "a=1; b=2".to_string());
        let req = Request::new(Method::GET, "https://app.example/x".parse().unwrap())
            .with_headers(headers);
        assert_eq!(req.cookie("a"), Some("1"));
        assert_eq!(req.cookie("b"), Some("2"));
    }

    #[test]
    fn origin_includes_non_default_port() {
        let req = Request::new(Method::GET, "https://app.example:8443/x?a=b".parse().unwrap());
        assert_eq!(req.origin(), "https://app.example:8443");
        assert_eq!(req.query_param("a").as_deref(), Some("b"));
    }

    #[test]
    fn merge_accumulates_cookies_and_prefers_other() {
        let a = Response {
            status: Some(200),
            cookies: vec![SetCookie::new("a", "1")],
            ..Default::default()
        };
        let b = Response {
            status: Some(302),
            cookies: vec![SetCookie::new("b", "2")],
            ..Default::default()
        };
        let merged = a.merge(b);
        assert_eq!(merged.status, Some(302));
        assert_eq!(merged.cookies.len(), 2);
    }
}
