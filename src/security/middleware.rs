//! Per-request security orchestration.
//!
//! # Request Flow
//! ```text
//! classify(path)
//!     none  → handler (untouched)
//!     basic → global rate limit → handler
//!     full  → global rate limit → [buffer form body] → CSRF → handler
//! every basic/full response → security headers + X-RateLimit-*
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::config::{ProtectionRule, SecurityConfig};
use crate::errors::WizardError;
use crate::security::context::RequestContext;
use crate::security::csrf::{CsrfService, CSRF_FORM_FIELD};
use crate::security::headers::apply_security_headers;
use crate::security::rate_limit::{OperationClass, RateLimitDecision, RateLimiter};

/// How much protection a path receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    /// Global rate limit and anti-forgery check.
    Full,
    /// Global rate limit only.
    Basic,
    None,
}

/// A refused request and the rate-limit state to report with it.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub error: WizardError,
    pub rate_limit: Option<RateLimitDecision>,
}

impl From<WizardError> for Rejection {
    fn from(error: WizardError) -> Self {
        Self {
            error,
            rate_limit: None,
        }
    }
}

/// How long the gate waits for a form body it needs to inspect.
pub const DEFAULT_BODY_TIMEOUT: Duration = Duration::from_secs(30);

/// Segment-aware prefix test: `/api/wizard` covers `/api/wizard/step`, not `/api/wizardry`.
pub(crate) fn prefix_matches(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

/// Longest matching prefix wins; unmatched paths get no protection.
pub fn classify(rules: &[ProtectionRule], path: &str) -> ProtectionLevel {
    rules
        .iter()
        .filter(|rule| prefix_matches(path, &rule.prefix))
        .max_by_key(|rule| rule.prefix.len())
        .map_or(ProtectionLevel::None, |rule| rule.level)
}

/// Composes the rate limiter, CSRF service and header policy.
pub struct SecurityGate {
    limiter: Arc<RateLimiter>,
    csrf: Arc<CsrfService>,
    config: SecurityConfig,
    body_timeout: Duration,
}

impl SecurityGate {
    pub fn new(limiter: Arc<RateLimiter>, csrf: Arc<CsrfService>, config: SecurityConfig) -> Self {
        Self {
            limiter,
            csrf,
            config,
            body_timeout: DEFAULT_BODY_TIMEOUT,
        }
    }

    pub fn with_body_timeout(mut self, body_timeout: Duration) -> Self {
        self.body_timeout = body_timeout;
        self
    }

    pub fn classify(&self, path: &str) -> ProtectionLevel {
        classify(&self.config.protection_rules, path)
    }

    /// Count the request against its source address's global bucket.
    pub fn admit(&self, ctx: &RequestContext) -> Result<RateLimitDecision, Rejection> {
        let key = ctx.network_key();
        let decision = self.limiter.is_allowed(&key, OperationClass::Global, None);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(Rejection {
                error: self.limiter.reject(&key, OperationClass::Global, &decision),
                rate_limit: Some(decision),
            })
        }
    }

    pub fn check_csrf(&self, ctx: &RequestContext) -> Result<(), WizardError> {
        self.csrf.check(ctx).map_err(WizardError::from)
    }

    /// Run every check for `level` against an already complete context.
    pub fn evaluate(
        &self,
        ctx: &RequestContext,
        level: ProtectionLevel,
    ) -> Result<Option<RateLimitDecision>, Rejection> {
        if level == ProtectionLevel::None {
            return Ok(None);
        }
        let decision = self.admit(ctx)?;
        if level == ProtectionLevel::Full {
            self.check_csrf(ctx).map_err(|error| Rejection {
                error,
                rate_limit: Some(decision),
            })?;
        }
        Ok(Some(decision))
    }

    /// The anti-forgery token can only be in the body.
    fn needs_form_token(&self, ctx: &RequestContext, headers: &HeaderMap) -> bool {
        ctx.csrf_header.is_none() && self.csrf.requires_validation(ctx) && is_form(headers)
    }

    /// Decorate a response leaving a protected path.
    pub fn finish(&self, headers: &mut HeaderMap, rate_limit: Option<&RateLimitDecision>) {
        if let Some(decision) = rate_limit {
            decision.apply_headers(headers);
        }
        if self.config.enable_headers {
            apply_security_headers(headers);
        }
    }

    fn reject(&self, rejection: Rejection) -> Response {
        let mut response = rejection.error.into_response();
        self.finish(response.headers_mut(), rejection.rate_limit.as_ref());
        response
    }

    fn timed_out(&self, decision: &RateLimitDecision) -> Response {
        let mut response = StatusCode::REQUEST_TIMEOUT.into_response();
        self.finish(response.headers_mut(), Some(decision));
        response
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

fn form_token(body: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == CSRF_FORM_FIELD)
        .map(|(_, value)| value.into_owned())
}

/// axum middleware applying the gate. Mount with `from_fn_with_state`.
pub async fn security_middleware(
    State(gate): State<Arc<SecurityGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let level = gate.classify(request.uri().path());
    if level == ProtectionLevel::None {
        return next.run(request).await;
    }

    let (parts, mut body) = request.into_parts();
    let mut ctx = RequestContext::from_parts(&parts);

    let decision = match gate.admit(&ctx) {
        Ok(decision) => decision,
        Err(rejection) => return gate.reject(rejection),
    };

    if level == ProtectionLevel::Full {
        if gate.needs_form_token(&ctx, &parts.headers) {
            let buffered =
                tokio::time::timeout(gate.body_timeout, to_bytes(body, gate.config.max_body_size))
                    .await;
            let Ok(buffered) = buffered else {
                tracing::warn!(path = %ctx.path, "Timed out reading form body");
                return gate.timed_out(&decision);
            };
            match buffered {
                Ok(bytes) => {
                    ctx.csrf_form_field = form_token(&bytes);
                    body = Body::from(bytes);
                }
                Err(_) => {
                    return gate.reject(Rejection {
                        error: WizardError::payload_too_large(format!(
                            "form body exceeds {} bytes",
                            gate.config.max_body_size
                        )),
                        rate_limit: Some(decision),
                    })
                }
            }
        }
        if let Err(error) = gate.check_csrf(&ctx) {
            return gate.reject(Rejection {
                error,
                rate_limit: Some(decision),
            });
        }
    }

    let mut response = next.run(Request::from_parts(parts, body)).await;
    gate.finish(response.headers_mut(), Some(&decision));
    response
}
