//! End-to-end flows through the guard services, without HTTP.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use wizard_guard::config::GuardConfig;
use wizard_guard::errors::{AiErrorCode, ErrorKind, NetworkErrorCode, WizardError};
use wizard_guard::recovery::{resolve, ActionKind, RecoveryOptions};
use wizard_guard::resilience::{retry_guarded, CircuitState, Dependency, RetryClass};
use wizard_guard::security::{
    FileOperation, FileType, OperationClass, RequestContext, SignedTokenOptions, TokenRejection,
};

mod common;

#[test]
fn test_ai_generation_limit_end_to_end() {
    let clock = common::manual_clock();
    let services = common::build_services(&GuardConfig::default(), clock.clone());
    let limiter = services.limiter();

    for i in 0..5 {
        let decision = limiter
            .check("user-1", OperationClass::AiGeneration, None)
            .unwrap_or_else(|e| panic!("request {i} rejected: {e}"));
        assert_eq!(decision.remaining, 4 - i);
        clock.advance(Duration::from_secs(5));
    }

    let err = limiter
        .check("user-1", OperationClass::AiGeneration, None)
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMIT");
    assert!(!err.is_retryable());
    let reset_time = err.context_u64("resetTime").unwrap();
    assert!(reset_time > clock_now(&clock));
    assert_eq!(reset_time, common::START_MS + 60_000);

    let plan = resolve(&err, &RecoveryOptions::default());
    assert_eq!(
        plan.actions[0].action,
        ActionKind::WaitAndRetry {
            at: Some(reset_time)
        }
    );

    clock.set(reset_time);
    assert!(limiter
        .check("user-1", OperationClass::AiGeneration, None)
        .is_ok());
}

fn clock_now(clock: &wizard_guard::ManualClock) -> u64 {
    use wizard_guard::Clock;
    clock.now_ms()
}

#[test]
fn test_csrf_token_bound_to_session() {
    let services = common::build_services(&GuardConfig::default(), common::manual_clock());
    let csrf = services.csrf();

    let session_a = RequestContext::new(Method::POST, "/api/wizard/submit")
        .with_source("203.0.113.10")
        .with_user_agent("Browser A")
        .with_user("owner");
    let issued = csrf.create_token(&session_a);

    for _ in 0..3 {
        assert!(csrf.validate_token(&session_a.clone().with_csrf_header(issued.token.clone())));
    }

    let session_b = RequestContext::new(Method::POST, "/api/wizard/submit")
        .with_source("203.0.113.10")
        .with_user_agent("Browser B")
        .with_user("owner")
        .with_csrf_header(issued.token.clone());
    assert!(!csrf.validate_token(&session_b));

    let anonymous = session_a.clone().with_csrf_header(issued.token);
    let anonymous = RequestContext {
        user_id: None,
        ..anonymous
    };
    assert!(!csrf.validate_token(&anonymous));
}

#[test]
fn test_signed_upload_expiry_and_tamper() {
    let clock = common::manual_clock();
    let services = common::build_services(&GuardConfig::default(), clock.clone());
    let tokens = services.tokens();

    let options = SignedTokenOptions::new(FileOperation::Upload, FileType::Image)
        .expires_in(Duration::from_secs(1))
        .user("owner");
    let grant = tokens.generate_signed_token("kitchen.jpg", &options).unwrap();
    assert!(grant.path.starts_with("uploads/owner/"));
    assert!(tokens.verify_signed_token(&grant.token).is_ok());

    // Flip one character anywhere in the token.
    for index in [0, grant.token.len() / 2, grant.token.len() - 1] {
        let mut bytes = grant.token.clone().into_bytes();
        bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(
            tokens.verify_signed_token(&tampered).is_err(),
            "tamper at {index} accepted"
        );
    }

    clock.advance(Duration::from_millis(1_000));
    assert!(matches!(
        tokens.verify_signed_token(&grant.token),
        Err(TokenRejection::Expired { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_guarded_retry_opens_breaker() {
    let clock = common::manual_clock();
    let services = common::build_services(&GuardConfig::default(), clock.clone());
    let breaker = services.breakers().get(Dependency::AiProvider);
    let calls = Arc::new(AtomicU32::new(0));

    // Two guarded operations of three attempts each exceed the threshold of five.
    for _ in 0..2 {
        let calls = calls.clone();
        let options = services.retry_options(RetryClass::AiGeneration);
        let report = retry_guarded(
            &breaker,
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(WizardError::ai(AiErrorCode::Timeout, "provider timed out"))
                }
            },
            &options,
        )
        .await;
        assert!(!report.is_success());
    }

    assert_eq!(breaker.state(), CircuitState::Open);
    let invoked = calls.load(Ordering::SeqCst);
    assert_eq!(invoked, 5);

    let err = breaker
        .call(|| async { Ok::<_, WizardError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CircuitOpen));

    clock.advance(Duration::from_millis(60_001));
    breaker
        .call(|| async { Ok::<_, WizardError>(()) })
        .await
        .unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_network_retry_recovers() {
    let services = common::build_services(&GuardConfig::default(), common::manual_clock());
    let breaker = services.breakers().get(Dependency::MapProvider);
    let calls = Arc::new(AtomicU32::new(0));

    let options = services.retry_options(RetryClass::Network);
    let report = retry_guarded(
        &breaker,
        {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(WizardError::network(NetworkErrorCode::NetworkError, "reset"))
                    } else {
                        Ok("geocoded")
                    }
                }
            }
        },
        &options,
    )
    .await;

    assert_eq!(report.attempts, 2);
    assert_eq!(report.into_result().unwrap(), "geocoded");
    assert_eq!(breaker.state(), CircuitState::Closed);
}
