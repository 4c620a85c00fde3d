//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, Response};
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;

use wizard_guard::config::GuardConfig;
use wizard_guard::lifecycle::{GuardServices, Shutdown};
use wizard_guard::security::SigningSecret;
use wizard_guard::{HttpServer, ManualClock};

pub const START_MS: u64 = 1_700_000_000_000;

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(START_MS))
}

pub fn test_secret() -> SigningSecret {
    SigningSecret::from_bytes(b"integration-test-signing-secret!!".to_vec()).unwrap()
}

pub fn build_services(config: &GuardConfig, clock: Arc<ManualClock>) -> Arc<GuardServices> {
    Arc::new(GuardServices::build(config, &test_secret(), clock).unwrap())
}

pub fn build_router(config: &GuardConfig, services: Arc<GuardServices>) -> Router {
    HttpServer::build_router(config, services)
}

/// Request builder pre-filled with a peer address, as the server would see it.
pub fn request(method: Method, uri: &str, peer: &str) -> axum::http::request::Builder {
    let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
    Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", "integration-test")
        .extension(ConnectInfo(addr))
}

pub fn empty(builder: axum::http::request::Builder) -> Request<Body> {
    builder.body(Body::empty()).unwrap()
}

pub fn json(builder: axum::http::request::Builder, value: &Value) -> Request<Body> {
    builder
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Serve the full stack on an ephemeral port until `shutdown` fires.
pub async fn start_server(
    config: GuardConfig,
    services: Arc<GuardServices>,
    shutdown: &Shutdown,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config, services);
    let mut rx = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server
            .run(listener, async move {
                let _ = rx.recv().await;
            })
            .await;
    });
    addr
}
