//! Per-request attributes the security services key off.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{header, request::Parts, HeaderMap, Method};

use crate::security::csrf::CSRF_HEADER;

/// Trusted caller identity header, set by the authentication layer in front of us.
pub const X_USER_ID: &str = "x-user-id";

/// Attributes of one incoming request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    /// Network source address (IP only).
    pub source_address: String,
    pub user_agent: String,
    pub user_id: Option<String>,
    /// Anti-forgery token from the dedicated header.
    pub csrf_header: Option<String>,
    /// Anti-forgery token from a form-encoded body field.
    pub csrf_form_field: Option<String>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            source_address: "unknown".to_string(),
            user_agent: String::new(),
            user_id: None,
            csrf_header: None,
            csrf_form_field: None,
        }
    }

    pub fn with_source(mut self, source_address: impl Into<String>) -> Self {
        self.source_address = source_address.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_csrf_header(mut self, token: impl Into<String>) -> Self {
        self.csrf_header = Some(token.into());
        self
    }

    pub fn with_form_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_form_field = Some(token.into());
        self
    }

    /// Build from axum request parts. The source address comes from
    /// `ConnectInfo`, never from client-supplied forwarding headers.
    pub fn from_parts(parts: &Parts) -> Self {
        let source_address = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            source_address,
            user_agent: header_str(&parts.headers, header::USER_AGENT.as_str())
                .unwrap_or_default(),
            user_id: header_str(&parts.headers, X_USER_ID).filter(|id| !id.is_empty()),
            csrf_header: header_str(&parts.headers, CSRF_HEADER),
            csrf_form_field: None,
        }
    }

    /// Submitted anti-forgery token. The header wins over the form field.
    pub fn submitted_token(&self) -> Option<&str> {
        self.csrf_header
            .as_deref()
            .or(self.csrf_form_field.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Identifier for per-caller buckets: the user when known, else the source address.
    /// Users and addresses live in separate namespaces.
    pub fn caller_key(&self) -> String {
        match &self.user_id {
            Some(user) => format!("user:{user}"),
            None => self.network_key(),
        }
    }

    /// Identifier for per-address buckets. Ignores the user header.
    pub fn network_key(&self) -> String {
        format!("ip:{}", self.source_address)
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_from_parts() {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/api/wizard/step?x=1")
            .header("user-agent", "Mozilla/5.0")
            .header(X_USER_ID, "user-42")
            .header(CSRF_HEADER, "abc")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("10.0.0.7:5555".parse::<SocketAddr>().unwrap()));
        let (parts, _) = request.into_parts();

        let ctx = RequestContext::from_parts(&parts);
        assert_eq!(ctx.path, "/api/wizard/step");
        assert_eq!(ctx.source_address, "10.0.0.7");
        assert_eq!(ctx.user_agent, "Mozilla/5.0");
        assert_eq!(ctx.caller_key(), "user:user-42");
        assert_eq!(ctx.network_key(), "ip:10.0.0.7");
        assert_eq!(ctx.submitted_token(), Some("abc"));
    }

    #[test]
    fn test_caller_key_falls_back_to_source() {
        let ctx = RequestContext::new(Method::GET, "/").with_source("192.168.1.1");
        assert_eq!(ctx.caller_key(), "ip:192.168.1.1");
    }

    #[test]
    fn test_user_and_address_keys_never_collide() {
        let by_user = RequestContext::new(Method::GET, "/").with_user("10.0.0.1");
        let by_addr = RequestContext::new(Method::GET, "/").with_source("10.0.0.1");
        assert_ne!(by_user.caller_key(), by_addr.caller_key());
    }

    #[test]
    fn test_header_token_preferred() {
        let ctx = RequestContext::new(Method::POST, "/")
            .with_form_token("form")
            .with_csrf_header("header");
        assert_eq!(ctx.submitted_token(), Some("header"));

        let ctx = RequestContext::new(Method::POST, "/").with_form_token("form");
        assert_eq!(ctx.submitted_token(), Some("form"));
    }
}
