//! Route handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::{FieldError, UploadErrorCode, WizardError, WizardResult};
use crate::lifecycle::GuardServices;
use crate::resilience::BreakerSnapshot;
use crate::security::csrf::{CSRF_FORM_FIELD, CSRF_HEADER};
use crate::security::{
    check_upload, FileOperation, FileType, OperationClass, RequestContext, SignedGrant,
    SignedTokenOptions, UploadRestrictions,
};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<GuardServices>,
}

fn invalid_body(rejection: JsonRejection) -> WizardError {
    WizardError::validation(
        format!("invalid request body: {rejection}"),
        vec![FieldError::new("body", "Request body is not valid JSON for this endpoint")],
    )
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub token: String,
    pub expires: u64,
    pub header_name: &'static str,
    pub field_name: &'static str,
}

/// Issue (or reissue) the caller's anti-forgery token.
pub async fn issue_csrf_token(State(state): State<AppState>, ctx: RequestContext) -> Response {
    let issued = state.services.csrf().create_token(&ctx);
    let mut response = Json(CsrfTokenResponse {
        token: issued.token,
        expires: issued.expires,
        header_name: CSRF_HEADER,
        field_name: CSRF_FORM_FIELD,
    })
    .into_response();

    if let Ok(cookie) = HeaderValue::from_str(&issued.cookie.to_header_value()) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub filename: String,
    #[serde(default = "default_operation")]
    pub operation: FileOperation,
    #[serde(default = "default_file_type")]
    pub file_type: FileType,
    /// Milliseconds. Takes precedence over `expires_in_secs`.
    pub expires_in: Option<u64>,
    pub expires_in_secs: Option<u64>,
    pub max_size: Option<u64>,
    pub allowed_mime_types: Option<Vec<String>>,
    pub resource_type: Option<String>,
}

fn default_operation() -> FileOperation {
    FileOperation::Upload
}

fn default_file_type() -> FileType {
    FileType::Image
}

/// Issue a signed grant. Uploads also count against the image upload limit.
pub async fn sign_upload(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<SignRequest>, JsonRejection>,
) -> WizardResult<Json<SignedGrant>> {
    let Json(request) = body.map_err(invalid_body)?;

    if request.operation == FileOperation::Upload {
        state
            .services
            .limiter()
            .check(&ctx.caller_key(), OperationClass::ImageUpload, None)?;
    }

    let mut options = SignedTokenOptions::new(request.operation, request.file_type);
    if let Some(ms) = request.expires_in {
        options = options.expires_in(Duration::from_millis(ms));
    } else if let Some(secs) = request.expires_in_secs {
        options = options.expires_in(Duration::from_secs(secs));
    }
    if let Some(user) = &ctx.user_id {
        options = options.user(user.clone());
    }
    if let Some(max_size) = request.max_size {
        options = options.max_size(max_size);
    }
    if let Some(mime_types) = request.allowed_mime_types {
        options = options.allowed_mime_types(mime_types);
    }
    if let Some(resource_type) = request.resource_type {
        options = options.resource_type(resource_type);
    }

    let grant = state
        .services
        .tokens()
        .generate_signed_token(&request.filename, &options)?;

    tracing::info!(
        client = %ctx.caller_key(),
        path = %grant.path,
        operation = %grant.operation,
        "Signed grant issued"
    );
    Ok(Json(grant))
}

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub path: String,
    pub token: String,
    pub operation: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedUpload {
    pub path: String,
    pub size: u64,
    pub mime_type: String,
}

/// Accept a body against a signed grant. Storage is out of scope: the body
/// is checked and discarded.
pub async fn receive_signed(
    State(state): State<AppState>,
    Query(query): Query<SignedQuery>,
    headers: HeaderMap,
    body: Body,
) -> WizardResult<Response> {
    let operation = FileOperation::parse(&query.operation).ok_or_else(|| {
        WizardError::validation(
            format!("unknown operation {}", query.operation),
            vec![FieldError::new("operation", "Unknown operation")],
        )
    })?;

    let payload = state
        .services
        .tokens()
        .authorize(&query.token, operation, &query.path)?;

    if operation != FileOperation::Upload {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let restrictions = UploadRestrictions::from_payload(&payload).ok_or_else(|| {
        WizardError::upload(
            UploadErrorCode::SecurityValidationFailed,
            "grant carries no upload restrictions",
        )
    })?;

    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared {
        check_upload(&restrictions, len, &mime_type)?;
    }

    let limit = usize::try_from(restrictions.max_size).unwrap_or(usize::MAX);
    let bytes = to_bytes(body, limit).await.map_err(|_| {
        WizardError::upload(
            UploadErrorCode::FileTooLarge,
            format!("body exceeds limit of {} bytes", restrictions.max_size),
        )
    })?;
    let size = bytes.len() as u64;
    check_upload(&restrictions, size, &mime_type)?;

    tracing::info!(path = %payload.filename, size, "Signed upload accepted");
    Ok((
        StatusCode::CREATED,
        Json(AcceptedUpload {
            path: payload.filename,
            size,
            mime_type,
        }),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
}

pub async fn revoke_upload(
    State(state): State<AppState>,
    body: Result<Json<RevokeRequest>, JsonRejection>,
) -> WizardResult<StatusCode> {
    let Json(request) = body.map_err(invalid_body)?;
    state.services.tokens().revoke_token(&request.token)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardStatus {
    pub version: &'static str,
    pub rate_limit_windows: usize,
    pub csrf_tokens: usize,
    pub revoked_tokens: usize,
    pub breakers: Vec<BreakerSnapshot>,
}

pub async fn guard_status(State(state): State<AppState>) -> Json<GuardStatus> {
    let services = &state.services;
    Json(GuardStatus {
        version: env!("CARGO_PKG_VERSION"),
        rate_limit_windows: services.limiter().len(),
        csrf_tokens: services.csrf().len(),
        revoked_tokens: services.tokens().revoked_count(),
        breakers: services.breakers().snapshots(),
    })
}
