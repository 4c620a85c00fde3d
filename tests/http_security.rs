//! Security behaviour of the HTTP surface.

use axum::body::{Body, Bytes};
use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use wizard_guard::config::GuardConfig;
use wizard_guard::lifecycle::Shutdown;
use wizard_guard::security::{FileOperation, FileType, SignedTokenOptions};

mod common;

const PEER: &str = "198.51.100.20";

/// Fetch a CSRF token for the default test session.
async fn csrf_token(router: &axum::Router) -> String {
    let response = router
        .clone()
        .oneshot(common::empty(common::request(
            Method::GET,
            "/api/csrf-token",
            PEER,
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_is_unprotected() {
    let config = GuardConfig::default();
    let router = common::build_router(&config, common::build_services(&config, common::manual_clock()));

    let response = router
        .oneshot(common::empty(common::request(Method::GET, "/health", PEER)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-frame-options").is_none());
    assert!(response.headers().get("x-ratelimit-limit").is_none());
    assert!(response.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn test_csrf_token_issued_with_cookie_and_headers() {
    let config = GuardConfig::default();
    let router = common::build_router(&config, common::build_services(&config, common::manual_clock()));

    let response = router
        .oneshot(common::empty(common::request(Method::GET, "/api/csrf-token", PEER)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    let cookie = headers["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("csrf-token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("content-security-policy"));
    assert!(headers.contains_key("strict-transport-security"));
    assert_eq!(headers["x-ratelimit-limit"], "100");
    assert_eq!(headers["x-ratelimit-remaining"], "99");

    let body = common::body_json(response).await;
    assert_eq!(body["token"].as_str().unwrap().len(), 64);
    assert_eq!(body["headerName"], "x-csrf-token");
}

#[tokio::test]
async fn test_full_path_rejects_missing_csrf() {
    let config = GuardConfig::default();
    let router = common::build_router(&config, common::build_services(&config, common::manual_clock()));

    let response = router
        .oneshot(common::json(
            common::request(Method::POST, "/api/upload/sign", PEER),
            &json!({ "filename": "front.png" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // Headers are present on rejections too.
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    assert!(response.headers().contains_key("x-ratelimit-remaining"));

    let body = common::body_json(response).await;
    assert_eq!(body["error"]["code"], "CSRF_INVALID");
    assert_eq!(body["error"]["retryable"], false);
}

#[tokio::test]
async fn test_csrf_token_from_other_session_rejected() {
    let config = GuardConfig::default();
    let router = common::build_router(&config, common::build_services(&config, common::manual_clock()));
    let token = csrf_token(&router).await;

    let response = router
        .oneshot(common::json(
            common::request(Method::POST, "/api/upload/sign", "203.0.113.99")
                .header("x-csrf-token", token),
            &json!({ "filename": "front.png" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_signed_upload_round_trip() {
    let config = GuardConfig::default();
    let services = common::build_services(&config, common::manual_clock());
    let router = common::build_router(&config, services.clone());
    let token = csrf_token(&router).await;

    let response = router
        .clone()
        .oneshot(common::json(
            common::request(Method::POST, "/api/upload/sign", PEER)
                .header("x-csrf-token", token.clone()),
            &json!({
                "filename": "Living Room.PNG",
                "fileType": "image",
                "resourceType": "properties",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let grant = common::body_json(response).await;
    let path = grant["path"].as_str().unwrap().to_string();
    let signed = grant["token"].as_str().unwrap().to_string();
    assert!(path.starts_with("properties/anonymous/"));
    assert!(path.ends_with("-Living_Room.png"));
    assert_eq!(grant["restrictions"]["maxSize"], 10 * 1024 * 1024);

    // The grant URL carries everything the upload endpoint needs.
    let url = grant["url"].as_str().unwrap();
    let upload_uri = url.trim_start_matches("http://localhost:8080");
    assert!(upload_uri.starts_with("/api/upload/signed?"));

    let response = router
        .clone()
        .oneshot(
            common::request(Method::PUT, upload_uri, PEER)
                .header("content-type", "image/png")
                .body(Body::from(vec![0u8; 2048]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let accepted = common::body_json(response).await;
    assert_eq!(accepted["path"], path.as_str());
    assert_eq!(accepted["size"], 2048);

    // Wrong content type is refused.
    let response = router
        .clone()
        .oneshot(
            common::request(Method::PUT, upload_uri, PEER)
                .header("content-type", "text/html")
                .body(Body::from("<html>"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    // Revoke, then the same grant is dead.
    let response = router
        .clone()
        .oneshot(common::json(
            common::request(Method::POST, "/api/upload/revoke", PEER)
                .header("x-csrf-token", token),
            &json!({ "token": signed }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(services.tokens().revoked_count(), 1);

    let response = router
        .oneshot(
            common::request(Method::PUT, upload_uri, PEER)
                .header("content-type", "image/png")
                .body(Body::from(vec![0u8; 16]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = common::body_json(response).await;
    assert_eq!(body["error"]["code"], "SECURITY_VALIDATION_FAILED");
    assert_eq!(body["error"]["context"]["reason"], "revoked");
}

#[tokio::test]
async fn test_signed_upload_rejects_wrong_path() {
    let config = GuardConfig::default();
    let services = common::build_services(&config, common::manual_clock());
    let router = common::build_router(&config, services.clone());

    let grant = services
        .tokens()
        .generate_signed_token(
            "a.png",
            &SignedTokenOptions::new(FileOperation::Upload, FileType::Image),
        )
        .unwrap();
    let uri = format!(
        "/api/upload/signed?path=uploads%2Fanonymous%2Fother.png&token={}&operation=upload",
        grant.token
    );

    let response = router
        .oneshot(
            common::request(Method::PUT, &uri, PEER)
                .header("content-type", "image/png")
                .body(Body::from(vec![1u8; 8]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_form_field_token_accepted() {
    let config = GuardConfig::default();
    let router = common::build_router(&config, common::build_services(&config, common::manual_clock()));
    let token = csrf_token(&router).await;

    // CSRF passes via the form field; the JSON handler then refuses the body.
    let response = router
        .oneshot(
            common::request(Method::POST, "/api/upload/revoke", PEER)
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(format!("token=abc&_csrf={token}")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = common::body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_global_rate_limit() {
    let mut config = GuardConfig::default();
    config.rate_limits.global.max_requests = 3;
    let router = common::build_router(&config, common::build_services(&config, common::manual_clock()));

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(common::empty(common::request(Method::GET, "/api/guard/status", PEER)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .clone()
        .oneshot(common::empty(common::request(Method::GET, "/api/guard/status", PEER)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(response.headers()["x-ratelimit-used"], "3");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    let body = common::body_json(response).await;
    assert_eq!(body["error"]["code"], "RATE_LIMIT");
    assert!(body["error"]["context"]["resetTime"].as_u64().unwrap() > common::START_MS);

    // Rotating the user header does not escape the address's bucket.
    for user in ["agent-7", "agent-8", PEER] {
        let response = router
            .clone()
            .oneshot(common::empty(
                common::request(Method::GET, "/api/guard/status", PEER).header("x-user-id", user),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    // Another address has its own bucket.
    let response = router
        .oneshot(common::empty(common::request(
            Method::GET,
            "/api/guard/status",
            "203.0.113.50",
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

fn stalled_body() -> Body {
    Body::from_stream(futures_util::stream::pending::<Result<Bytes, std::io::Error>>())
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_upload_keeps_security_headers() {
    let config = GuardConfig::default();
    let services = common::build_services(&config, common::manual_clock());
    let router = common::build_router(&config, services.clone());

    let grant = services
        .tokens()
        .generate_signed_token(
            "slow.png",
            &SignedTokenOptions::new(FileOperation::Upload, FileType::Image),
        )
        .unwrap();
    let uri = grant.url.trim_start_matches("http://localhost:8080").to_string();

    let response = router
        .oneshot(
            common::request(Method::PUT, &uri, PEER)
                .header("content-type", "image/png")
                .body(stalled_body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let headers = response.headers();
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("content-security-policy"));
    assert_eq!(headers["x-ratelimit-limit"], "100");
    assert_eq!(headers["x-ratelimit-remaining"], "99");
}

#[tokio::test(start_paused = true)]
async fn test_stalled_form_body_times_out_with_headers() {
    let config = GuardConfig::default();
    let router = common::build_router(&config, common::build_services(&config, common::manual_clock()));

    let response = router
        .oneshot(
            common::request(Method::POST, "/api/upload/revoke", PEER)
                .header("content-type", "application/x-www-form-urlencoded")
                .body(stalled_body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-ratelimit-used"], "1");
}

#[tokio::test]
async fn test_status_reports_stores() {
    let config = GuardConfig::default();
    let router = common::build_router(&config, common::build_services(&config, common::manual_clock()));
    csrf_token(&router).await;

    let response = router
        .oneshot(common::empty(common::request(Method::GET, "/api/guard/status", PEER)))
        .await
        .unwrap();
    let body = common::body_json(response).await;
    assert_eq!(body["csrfTokens"], 1);
    assert_eq!(body["rateLimitWindows"], 1);
    assert_eq!(body["breakers"].as_array().unwrap().len(), 3);
    assert_eq!(body["breakers"][0]["state"], "CLOSED");
}

#[tokio::test]
async fn test_served_over_tcp() {
    let config = GuardConfig::default();
    let services = common::build_services(&config, common::manual_clock());
    let shutdown = Shutdown::new();
    let addr = common::start_server(config, services, &shutdown).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .get(format!("http://{addr}/api/csrf-token"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-request-id"], "trace-me");
    assert_eq!(res.headers()["x-frame-options"], "DENY");

    shutdown.trigger();
}
