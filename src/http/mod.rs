//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers)
//!     → request.rs (assign / propagate x-request-id)
//!     → security::middleware (rate limit, CSRF, security headers)
//!     → handlers.rs (CSRF tokens, signed grants, status)
//!     → response.rs (WizardError → status + JSON body)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use handlers::AppState;
pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::status_for;
pub use server::HttpServer;
