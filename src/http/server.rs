//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, security gate, timeout)
//! - Serve with graceful shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::GuardConfig;
use crate::http::handlers::{self, AppState};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::GuardServices;
use crate::security::security_middleware;

/// HTTP front for the guard services.
pub struct HttpServer {
    router: Router,
    config: GuardConfig,
}

impl HttpServer {
    pub fn new(config: GuardConfig, services: Arc<GuardServices>) -> Self {
        let router = Self::build_router(&config, services);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &GuardConfig, services: Arc<GuardServices>) -> Router {
        let gate = services.gate().clone();
        let state = AppState { services };

        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/csrf-token", get(handlers::issue_csrf_token))
            .route("/api/upload/sign", post(handlers::sign_upload))
            .route("/api/upload/signed", put(handlers::receive_signed))
            .route("/api/upload/revoke", post(handlers::revoke_upload))
            .route("/api/guard/status", get(handlers::guard_status))
            .with_state(state)
            // Inside the gate, so timed-out responses still get security headers.
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(from_fn_with_state(gate, security_middleware))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// A clone of the router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            request_timeout_secs = self.config.listener.request_timeout_secs,
            "HTTP server starting"
        );

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}
