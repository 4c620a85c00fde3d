//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → context.rs (method, path, source address, user agent, user id, tokens)
//!     → middleware.rs (classify path: full / basic / none)
//!     → rate_limit.rs (global per-caller sliding window)
//!     → csrf.rs (session-bound token, full protection only)
//!     → headers.rs (security headers on every protected response)
//!     → Pass to routing
//!
//! File grants:
//!     upload_path.rs (sanitised object path)
//!     → signed_token.rs (HMAC-signed, expiring, revocable)
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - No trust in client input; caller identity comes from a trusted header
//!   set upstream and the socket address
//! - Stores are owned service instances, not globals

pub mod context;
pub mod csrf;
pub mod headers;
pub mod middleware;
pub mod rate_limit;
pub mod secret;
pub mod signed_token;
pub mod upload_path;

pub use context::RequestContext;
pub use csrf::{CookieSpec, CsrfRejection, CsrfService, IssuedCsrfToken};
pub use middleware::{security_middleware, ProtectionLevel, SecurityGate};
pub use rate_limit::{OperationClass, RateLimitDecision, RateLimiter, RequestOutcome};
pub use secret::{SecretError, SigningSecret};
pub use signed_token::{
    check_upload, FileOperation, FileType, SignedGrant, SignedTokenOptions, SignedTokenPayload,
    SignedTokenService, TokenRejection, UploadRestrictions,
};
pub use upload_path::{build_upload_path, sanitize_filename};
