//! Anti-forgery token service.
//!
//! Tokens are bound to a session fingerprint (source address, user agent and
//! user id). A token stays valid for its whole lifetime and is handed out again
//! if the same session asks before it expires.

use std::fmt;

use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::CsrfConfig;
use crate::errors::WizardError;
use crate::observability::metrics;
use crate::security::context::RequestContext;
use crate::security::middleware::prefix_matches;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FORM_FIELD: &str = "_csrf";
pub const CSRF_COOKIE: &str = "csrf-token";

const TOKEN_BYTES: usize = 32;

/// Why a state-changing request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfRejection {
    #[error("no anti-forgery token submitted")]
    Missing,
    #[error("no anti-forgery token issued for this session")]
    UnknownSession,
    #[error("anti-forgery token expired")]
    Expired,
    #[error("anti-forgery token does not match")]
    Mismatch,
}

impl CsrfRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::UnknownSession => "unknown_session",
            Self::Expired => "expired",
            Self::Mismatch => "mismatch",
        }
    }
}

impl From<CsrfRejection> for WizardError {
    fn from(rejection: CsrfRejection) -> Self {
        WizardError::csrf_invalid(rejection.as_str())
    }
}

/// Cookie attributes for the issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSpec {
    pub name: &'static str,
    pub value: String,
    pub max_age_secs: u64,
    pub path: &'static str,
    pub http_only: bool,
    pub same_site_strict: bool,
    pub secure: bool,
}

impl CookieSpec {
    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!(
            "{}={}; Path={}; Max-Age={}",
            self.name, self.value, self.path, self.max_age_secs
        );
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.same_site_strict {
            out.push_str("; SameSite=Strict");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out
    }
}

impl fmt::Display for CookieSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header_value())
    }
}

/// A token handed to a session.
#[derive(Debug, Clone)]
pub struct IssuedCsrfToken {
    pub token: String,
    /// Epoch milliseconds.
    pub expires: u64,
    pub cookie: CookieSpec,
}

#[derive(Debug, Clone)]
struct CsrfRecord {
    token: String,
    expires: u64,
}

/// Issues and checks anti-forgery tokens.
pub struct CsrfService {
    records: DashMap<String, CsrfRecord>,
    config: CsrfConfig,
    clock: SharedClock,
}

impl CsrfService {
    pub fn new(config: CsrfConfig, clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            config,
            clock,
        }
    }

    fn ttl_ms(&self) -> u64 {
        self.config.token_ttl_secs.saturating_mul(1_000)
    }

    /// Session fingerprint: SHA-256 over the length-prefixed session attributes.
    pub fn session_key(ctx: &RequestContext) -> String {
        let mut hasher = Sha256::new();
        for part in [
            ctx.source_address.as_str(),
            ctx.user_agent.as_str(),
            ctx.user_id.as_deref().unwrap_or("anonymous"),
        ] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Issue a token for the requesting session, reusing a live one.
    pub fn create_token(&self, ctx: &RequestContext) -> IssuedCsrfToken {
        let now = self.clock.now_ms();
        let key = Self::session_key(ctx);

        let record = self
            .records
            .entry(key)
            .and_modify(|r| {
                if r.expires <= now {
                    *r = self.fresh_record(now);
                }
            })
            .or_insert_with(|| self.fresh_record(now))
            .clone();

        let max_age_secs = record.expires.saturating_sub(now).div_ceil(1_000);
        IssuedCsrfToken {
            cookie: CookieSpec {
                name: CSRF_COOKIE,
                value: record.token.clone(),
                max_age_secs,
                path: "/",
                http_only: true,
                same_site_strict: true,
                secure: self.config.secure_cookie,
            },
            token: record.token,
            expires: record.expires,
        }
    }

    fn fresh_record(&self, now: u64) -> CsrfRecord {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        CsrfRecord {
            token: hex::encode(bytes),
            expires: now + self.ttl_ms(),
        }
    }

    /// Whether a request must carry a token: any non-safe method on a protected path.
    pub fn requires_validation(&self, ctx: &RequestContext) -> bool {
        if matches!(ctx.method.as_str(), "GET" | "HEAD" | "OPTIONS") {
            return false;
        }
        self.config
            .protected_paths
            .iter()
            .any(|prefix| prefix_matches(&ctx.path, prefix))
    }

    /// Validate the submitted token against the session's stored one.
    pub fn check(&self, ctx: &RequestContext) -> Result<(), CsrfRejection> {
        if !self.requires_validation(ctx) {
            return Ok(());
        }
        let result = self.compare(ctx);
        if let Err(rejection) = result {
            tracing::warn!(
                client = %ctx.source_address,
                path = %ctx.path,
                reason = rejection.as_str(),
                "CSRF validation failed"
            );
            metrics::record_csrf_rejection(rejection.as_str());
        }
        result
    }

    fn compare(&self, ctx: &RequestContext) -> Result<(), CsrfRejection> {
        let submitted = ctx.submitted_token().ok_or(CsrfRejection::Missing)?;
        let key = Self::session_key(ctx);
        let record = self
            .records
            .get(&key)
            .map(|r| r.clone())
            .ok_or(CsrfRejection::UnknownSession)?;

        if record.expires <= self.clock.now_ms() {
            self.records.remove_if(&key, |_, r| r.token == record.token);
            return Err(CsrfRejection::Expired);
        }
        if bool::from(submitted.as_bytes().ct_eq(record.token.as_bytes())) {
            Ok(())
        } else {
            Err(CsrfRejection::Mismatch)
        }
    }

    /// Boolean form of [`check`](Self::check).
    pub fn validate_token(&self, ctx: &RequestContext) -> bool {
        self.check(ctx).is_ok()
    }

    /// Forget the session's token.
    pub fn revoke(&self, ctx: &RequestContext) -> bool {
        self.records.remove(&Self::session_key(ctx)).is_some()
    }

    /// Drop expired tokens.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.records.len();
        self.records.retain(|_, r| r.expires > now);
        before.saturating_sub(self.records.len())
    }

    /// Number of live sessions holding a token.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::http::Method;
    use std::sync::Arc;
    use std::time::Duration;

    fn service() -> (CsrfService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(5_000_000));
        (CsrfService::new(CsrfConfig::default(), clock.clone()), clock)
    }

    fn session() -> RequestContext {
        RequestContext::new(Method::POST, "/api/wizard/submit")
            .with_source("203.0.113.9")
            .with_user_agent("Mozilla/5.0")
            .with_user("user-1")
    }

    #[test]
    fn test_token_round_trip_for_same_session() {
        let (svc, _) = service();
        let issued = svc.create_token(&session());
        assert_eq!(issued.token.len(), TOKEN_BYTES * 2);
        assert!(svc.validate_token(&session().with_csrf_header(issued.token.clone())));
        assert!(svc.validate_token(&session().with_form_token(issued.token)));
    }

    #[test]
    fn test_token_is_reusable_within_ttl() {
        let (svc, clock) = service();
        let first = svc.create_token(&session());
        clock.advance(Duration::from_secs(600));
        let second = svc.create_token(&session());
        assert_eq!(first.token, second.token);
        assert!(svc.validate_token(&session().with_csrf_header(first.token.clone())));
        assert!(svc.validate_token(&session().with_csrf_header(first.token)));
    }

    #[test]
    fn test_other_session_is_rejected() {
        let (svc, _) = service();
        let issued = svc.create_token(&session());
        let other = session().with_source("198.51.100.1").with_csrf_header(issued.token);
        assert_eq!(svc.check(&other), Err(CsrfRejection::UnknownSession));
    }

    #[test]
    fn test_wrong_token_is_rejected() {
        let (svc, _) = service();
        svc.create_token(&session());
        let forged = session().with_csrf_header("00".repeat(TOKEN_BYTES));
        assert_eq!(svc.check(&forged), Err(CsrfRejection::Mismatch));
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let (svc, _) = service();
        svc.create_token(&session());
        assert_eq!(svc.check(&session()), Err(CsrfRejection::Missing));
    }

    #[test]
    fn test_expired_token_is_rejected_and_reissued() {
        let (svc, clock) = service();
        let issued = svc.create_token(&session());
        clock.advance(Duration::from_secs(3_600));
        assert_eq!(
            svc.check(&session().with_csrf_header(issued.token.clone())),
            Err(CsrfRejection::Expired)
        );
        assert_eq!(svc.len(), 0);
        let fresh = svc.create_token(&session());
        assert_ne!(fresh.token, issued.token);
    }

    #[test]
    fn test_safe_methods_and_open_paths_are_exempt() {
        let (svc, _) = service();
        let get = RequestContext::new(Method::GET, "/api/wizard/step");
        assert!(svc.validate_token(&get));
        let open = RequestContext::new(Method::POST, "/api/public/contact");
        assert!(svc.validate_token(&open));
    }

    #[test]
    fn test_protected_prefix_respects_segments() {
        let (svc, _) = service();
        let lookalike = RequestContext::new(Method::POST, "/api/wizardry");
        assert!(!svc.requires_validation(&lookalike));
        assert!(svc.validate_token(&lookalike));

        let nested = RequestContext::new(Method::POST, "/api/wizard/step/3");
        assert!(svc.requires_validation(&nested));
        assert!(svc.requires_validation(&RequestContext::new(Method::DELETE, "/api/drafts")));
    }

    #[test]
    fn test_cookie_attributes() {
        let (svc, _) = service();
        let issued = svc.create_token(&session());
        let header = issued.cookie.to_header_value();
        assert!(header.starts_with(&format!("csrf-token={}", issued.token)));
        assert!(header.contains("Max-Age=3600"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Strict"));
        assert!(header.contains("Secure"));
        assert!(header.contains("Path=/"));
    }

    #[test]
    fn test_purge_and_revoke() {
        let (svc, clock) = service();
        svc.create_token(&session());
        svc.create_token(&session().with_user("user-2"));
        assert_eq!(svc.len(), 2);
        assert!(svc.revoke(&session()));
        clock.advance(Duration::from_secs(3_601));
        assert_eq!(svc.purge_expired(), 1);
        assert!(svc.is_empty());
    }
}
