//! HMAC-signed, time-limited file operation grants.
//!
//! # Token Format
//! ```text
//! base64url( canonical_json(payload) ‖ HMAC-SHA256(secret, canonical_json(payload)) )
//! ```
//! The signature is always the trailing 32 bytes. The payload serialises its
//! fields in declaration order and its metadata as a sorted map, so the same
//! payload always yields the same bytes.
//!
//! # Verification Order
//! signature → payload shape → revocation → expiry. Scope checks
//! (operation, path) happen in [`SignedTokenService::authorize`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use url::Url;

use crate::clock::SharedClock;
use crate::config::SignedTokenConfig;
use crate::errors::{FieldError, UploadErrorCode, WizardError};
use crate::observability::metrics;
use crate::security::secret::{SecretError, SigningSecret};
use crate::security::upload_path::{build_upload_path, is_safe_object_path, random_suffix};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;
const NONCE_BYTES: usize = 16;

const META_FILE_TYPE: &str = "fileType";
const META_MAX_SIZE: &str = "maxSize";
const META_MIME_TYPES: &str = "allowedMimeTypes";

/// File operation a token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Upload,
    Download,
    Preview,
    Delete,
}

impl FileOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Preview => "preview",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upload" => Some(Self::Upload),
            "download" => Some(Self::Download),
            "preview" => Some(Self::Preview),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    fn max_expiry_secs(self, config: &SignedTokenConfig) -> u64 {
        match self {
            Self::Upload => config.max_upload_expiry_secs,
            Self::Download => config.max_download_expiry_secs,
            Self::Preview => config.max_preview_expiry_secs,
            Self::Delete => config.max_delete_expiry_secs,
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad file category with default upload restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Document,
    Video,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(Self::Image),
            "document" => Some(Self::Document),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn default_max_size(self) -> u64 {
        match self {
            Self::Image => 10 * 1024 * 1024,
            Self::Document => 25 * 1024 * 1024,
            Self::Video => 100 * 1024 * 1024,
        }
    }

    pub fn default_mime_types(self) -> &'static [&'static str] {
        match self {
            Self::Image => &["image/jpeg", "image/png", "image/webp", "image/gif"],
            Self::Document => &["application/pdf"],
            Self::Video => &["video/mp4", "video/webm"],
        }
    }
}

/// Limits an upload must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRestrictions {
    pub file_type: FileType,
    pub max_size: u64,
    pub allowed_mime_types: Vec<String>,
}

impl UploadRestrictions {
    pub fn defaults_for(file_type: FileType) -> Self {
        Self {
            file_type,
            max_size: file_type.default_max_size(),
            allowed_mime_types: file_type
                .default_mime_types()
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    /// Recover the restrictions embedded in a verified payload.
    pub fn from_payload(payload: &SignedTokenPayload) -> Option<Self> {
        let file_type = FileType::parse(payload.metadata.get(META_FILE_TYPE)?)?;
        let max_size = payload.metadata.get(META_MAX_SIZE)?.parse().ok()?;
        let allowed_mime_types = payload
            .metadata
            .get(META_MIME_TYPES)?
            .split(',')
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        Some(Self {
            file_type,
            max_size,
            allowed_mime_types,
        })
    }
}

/// Signed content of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTokenPayload {
    /// Object path the grant applies to.
    pub filename: String,
    pub operation: FileOperation,
    /// Epoch milliseconds.
    pub expires: u64,
    pub user_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub nonce: String,
}

/// Request for a new grant.
#[derive(Debug, Clone)]
pub struct SignedTokenOptions {
    pub operation: FileOperation,
    pub expires_in: Option<Duration>,
    pub user_id: Option<String>,
    pub file_type: FileType,
    /// Tightens the file type's default; never loosens it.
    pub max_size: Option<u64>,
    /// Must be a subset of the file type's defaults.
    pub allowed_mime_types: Option<Vec<String>>,
    /// First path segment for uploads.
    pub resource_type: String,
    pub metadata: BTreeMap<String, String>,
}

impl SignedTokenOptions {
    pub fn new(operation: FileOperation, file_type: FileType) -> Self {
        Self {
            operation,
            expires_in: None,
            user_id: None,
            file_type,
            max_size: None,
            allowed_mime_types: None,
            resource_type: "uploads".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn allowed_mime_types(mut self, mime_types: Vec<String>) -> Self {
        self.allowed_mime_types = Some(mime_types);
        self
    }

    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An issued grant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedGrant {
    pub url: String,
    pub token: String,
    pub path: String,
    pub operation: FileOperation,
    /// Epoch milliseconds.
    pub expires: u64,
    pub restrictions: UploadRestrictions,
}

/// Why a token was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token expired at {expired_at}")]
    Expired { expired_at: u64 },
    #[error("token has been revoked")]
    Revoked,
    #[error("token grants {granted}, not {requested}")]
    OperationMismatch {
        granted: FileOperation,
        requested: FileOperation,
    },
    #[error("token does not cover the requested path")]
    PathMismatch,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired { .. } => "expired",
            Self::Revoked => "revoked",
            Self::OperationMismatch { .. } => "operation_mismatch",
            Self::PathMismatch => "path_mismatch",
        }
    }
}

impl From<TokenRejection> for WizardError {
    fn from(rejection: TokenRejection) -> Self {
        let err = WizardError::upload(UploadErrorCode::SecurityValidationFailed, rejection.to_string())
            .with_context("reason", rejection.as_str());
        match rejection {
            TokenRejection::Expired { expired_at } => err.with_context("expiredAt", expired_at),
            _ => err,
        }
    }
}

/// Issues and verifies signed file grants.
pub struct SignedTokenService {
    keyed: HmacSha256,
    config: SignedTokenConfig,
    /// Revoked nonces and the expiry after which they no longer matter.
    revoked: DashMap<String, u64>,
    clock: SharedClock,
}

impl SignedTokenService {
    pub fn new(
        secret: &SigningSecret,
        config: SignedTokenConfig,
        clock: SharedClock,
    ) -> Result<Self, SecretError> {
        let keyed = HmacSha256::new_from_slice(secret.expose())
            .map_err(|_| SecretError::InvalidKey)?;
        Ok(Self {
            keyed,
            config,
            revoked: DashMap::new(),
            clock,
        })
    }

    pub fn config(&self) -> &SignedTokenConfig {
        &self.config
    }

    fn encode(&self, payload: &SignedTokenPayload) -> Result<String, WizardError> {
        let mut bytes = serde_json::to_vec(payload).map_err(|e| {
            WizardError::upload(UploadErrorCode::ProcessingError, format!("encode payload: {e}"))
        })?;
        let mut mac = self.keyed.clone();
        mac.update(&bytes);
        bytes.extend_from_slice(&mac.finalize().into_bytes());
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Check signature and shape only.
    fn decode(&self, token: &str) -> Result<SignedTokenPayload, TokenRejection> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TokenRejection::Malformed)?;
        if raw.len() <= SIGNATURE_LEN {
            return Err(TokenRejection::Malformed);
        }
        let (body, signature) = raw.split_at(raw.len() - SIGNATURE_LEN);

        let mut mac = self.keyed.clone();
        mac.update(body);
        // Constant-time comparison.
        mac.verify_slice(signature)
            .map_err(|_| TokenRejection::InvalidSignature)?;

        serde_json::from_slice(body).map_err(|_| TokenRejection::Malformed)
    }

    fn restrictions_for(&self, options: &SignedTokenOptions) -> Result<UploadRestrictions, WizardError> {
        let mut restrictions = UploadRestrictions::defaults_for(options.file_type);

        if let Some(max_size) = options.max_size {
            if max_size == 0 {
                return Err(WizardError::validation(
                    "max size must be positive",
                    vec![FieldError::new("maxSize", "Must be greater than zero")],
                ));
            }
            restrictions.max_size = restrictions.max_size.min(max_size);
        }

        if let Some(requested) = &options.allowed_mime_types {
            let narrowed: Vec<String> = requested
                .iter()
                .filter(|m| restrictions.allowed_mime_types.contains(*m))
                .cloned()
                .collect();
            if narrowed.is_empty() {
                return Err(WizardError::upload(
                    UploadErrorCode::InvalidType,
                    format!("no permitted mime types for {}", options.file_type.as_str()),
                ));
            }
            restrictions.allowed_mime_types = narrowed;
        }
        Ok(restrictions)
    }

    /// Issue a grant for `filename`.
    ///
    /// For uploads `filename` is the client's name and the object path is
    /// generated; for other operations it must be an existing object path.
    pub fn generate_signed_token(
        &self,
        filename: &str,
        options: &SignedTokenOptions,
    ) -> Result<SignedGrant, WizardError> {
        if filename.trim().is_empty() {
            return Err(WizardError::validation(
                "filename is empty",
                vec![FieldError::new("filename", "Filename is required")],
            ));
        }

        let now = self.clock.now_ms();
        let restrictions = self.restrictions_for(options)?;

        let path = match options.operation {
            FileOperation::Upload => build_upload_path(
                &options.resource_type,
                options.user_id.as_deref(),
                now,
                &random_suffix(),
                filename,
                self.config.max_filename_len,
            ),
            _ if is_safe_object_path(filename) => filename.to_string(),
            _ => {
                return Err(WizardError::upload(
                    UploadErrorCode::SecurityValidationFailed,
                    "object path is not allowed",
                ))
            }
        };

        let max_ms = options
            .operation
            .max_expiry_secs(&self.config)
            .saturating_mul(1_000);
        let requested_ms = options.expires_in.map_or(
            self.config.default_expiry_secs.saturating_mul(1_000),
            |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
        );
        let expires = now.saturating_add(requested_ms.min(max_ms));

        let mut metadata = options.metadata.clone();
        metadata.insert(META_FILE_TYPE.to_string(), restrictions.file_type.as_str().to_string());
        metadata.insert(META_MAX_SIZE.to_string(), restrictions.max_size.to_string());
        metadata.insert(META_MIME_TYPES.to_string(), restrictions.allowed_mime_types.join(","));

        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);

        let payload = SignedTokenPayload {
            filename: path.clone(),
            operation: options.operation,
            expires,
            user_id: options.user_id.clone(),
            metadata,
            nonce: hex::encode(nonce),
        };
        let token = self.encode(&payload)?;
        let url = self.grant_url(&path, &token, expires, options.operation)?;

        tracing::debug!(
            path = %path,
            operation = %options.operation,
            expires,
            "Issued signed token"
        );

        Ok(SignedGrant {
            url,
            token,
            path,
            operation: options.operation,
            expires,
            restrictions,
        })
    }

    fn grant_url(
        &self,
        path: &str,
        token: &str,
        expires: u64,
        operation: FileOperation,
    ) -> Result<String, WizardError> {
        let mut url = Url::parse(&self.config.base_url)
            .and_then(|base| base.join(&self.config.endpoint))
            .map_err(|e| {
                WizardError::upload(UploadErrorCode::ProcessingError, format!("invalid base url: {e}"))
            })?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("token", token)
            .append_pair("expires", &expires.to_string())
            .append_pair("operation", operation.as_str());
        Ok(url.into())
    }

    /// Verify signature, revocation and expiry.
    pub fn verify_signed_token(&self, token: &str) -> Result<SignedTokenPayload, TokenRejection> {
        let result = self.decode(token).and_then(|payload| {
            if self.revoked.contains_key(&payload.nonce) {
                return Err(TokenRejection::Revoked);
            }
            if self.clock.now_ms() >= payload.expires {
                return Err(TokenRejection::Expired {
                    expired_at: payload.expires,
                });
            }
            Ok(payload)
        });

        match &result {
            Ok(_) => metrics::record_token_verification("valid"),
            Err(rejection) => {
                tracing::warn!(reason = rejection.as_str(), "Signed token rejected");
                metrics::record_token_verification(rejection.as_str());
            }
        }
        result
    }

    /// Verify and check that the token grants `operation` on `path`.
    pub fn authorize(
        &self,
        token: &str,
        operation: FileOperation,
        path: &str,
    ) -> Result<SignedTokenPayload, TokenRejection> {
        let payload = self.verify_signed_token(token)?;
        if payload.operation != operation {
            return Err(TokenRejection::OperationMismatch {
                granted: payload.operation,
                requested: operation,
            });
        }
        if payload.filename != path {
            return Err(TokenRejection::PathMismatch);
        }
        Ok(payload)
    }

    /// Revoke a token. Only authentic tokens are recorded.
    pub fn revoke_token(&self, token: &str) -> Result<(), TokenRejection> {
        let payload = self.decode(token)?;
        if payload.expires > self.clock.now_ms() {
            self.revoked.insert(payload.nonce, payload.expires);
        }
        tracing::info!(path = %payload.filename, "Signed token revoked");
        Ok(())
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.decode(token)
            .map(|payload| self.revoked.contains_key(&payload.nonce))
            .unwrap_or(false)
    }

    /// Drop revocations whose tokens have expired anyway.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.revoked.len();
        self.revoked.retain(|_, expires| *expires > now);
        before.saturating_sub(self.revoked.len())
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }
}

/// Check an incoming upload against its restrictions.
pub fn check_upload(
    restrictions: &UploadRestrictions,
    size: u64,
    mime_type: &str,
) -> Result<(), WizardError> {
    if size > restrictions.max_size {
        return Err(WizardError::upload(
            UploadErrorCode::FileTooLarge,
            format!("{size} bytes exceeds limit of {}", restrictions.max_size),
        )
        .with_context("size", size)
        .with_context("maxSize", restrictions.max_size));
    }
    let mime = mime_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if !restrictions.allowed_mime_types.iter().any(|m| *m == mime) {
        return Err(WizardError::upload(
            UploadErrorCode::InvalidType,
            format!("mime type {mime} not permitted"),
        )
        .with_context("mimeType", mime));
    }
    Ok(())
}
