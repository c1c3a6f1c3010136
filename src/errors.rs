//! Error taxonomy for the metadata sync surface.
//!
//! Every variant carries a stable error code.  The enum implements
//! [`axum::response::IntoResponse`] so HTTP handlers can simply return
//! `Err(SyncError::NotFound { .. })`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Errors raised by the client surface and the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Required connection settings are missing.
    #[error("configuration is missing required fields: {}", .missing.join(", "))]
    Configuration { missing: Vec<String> },

    /// A permission hook rejected the operation before any side effect.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The object is absent from the object store.
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// A caller-supplied key collides with an existing metadata record.
    #[error("key already exists: {bucket}/{key}")]
    DuplicateKey { bucket: String, key: String },

    /// The object store's checksum disagrees with the expected one.
    #[error("checksum mismatch: expected {expected}, object store reported {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A network or object store failure that is worth retrying.
    #[error("transient store failure: {0:#}")]
    TransientStore(anyhow::Error),

    /// A retried action failed on every attempt.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// A request argument is invalid (bad cursor, empty key, ...).
    #[error("{message}")]
    InvalidArgument { message: String },

    /// No retry job is registered under this id.
    #[error("unknown job: {job_id}")]
    JobNotFound { job_id: String },

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// Shorthand for [`SyncError::PermissionDenied`].
    pub fn denied(message: impl Into<String>) -> Self {
        SyncError::PermissionDenied {
            message: message.into(),
        }
    }

    /// Shorthand for [`SyncError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        SyncError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Whether a retry executor should attempt the action again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientStore(_))
    }

    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Configuration { .. } => "ConfigurationError",
            SyncError::PermissionDenied { .. } => "PermissionDenied",
            SyncError::NotFound { .. } => "NotFound",
            SyncError::DuplicateKey { .. } => "DuplicateKey",
            SyncError::ChecksumMismatch { .. } => "ChecksumMismatch",
            SyncError::TransientStore(_) => "TransientStoreError",
            SyncError::RetryExhausted { .. } => "RetryExhausted",
            SyncError::InvalidArgument { .. } => "InvalidArgument",
            SyncError::JobNotFound { .. } => "JobNotFound",
            SyncError::Internal(_) => "InternalError",
        }
    }

    /// Return the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::DuplicateKey { .. } => StatusCode::CONFLICT,
            SyncError::ChecksumMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::RetryExhausted { .. } => StatusCode::BAD_GATEWAY,
            SyncError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            SyncError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), request_id = %request_id, "{self}");
        }
        let body = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "requestId": request_id,
        });
        (status, [("x-request-id", request_id)], Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message_lists_every_field() {
        let err = SyncError::Configuration {
            missing: vec!["bucket (R2_BUCKET)".into(), "endpoint (R2_ENDPOINT)".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("bucket (R2_BUCKET)"));
        assert!(msg.contains("endpoint (R2_ENDPOINT)"));
        assert_eq!(err.code(), "ConfigurationError");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(SyncError::TransientStore(anyhow::anyhow!("timeout")).is_retryable());
        assert!(!SyncError::NotFound {
            bucket: "b".into(),
            key: "k".into()
        }
        .is_retryable());
        assert!(!SyncError::Internal(anyhow::anyhow!("boom")).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(SyncError::denied("no").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            SyncError::DuplicateKey {
                bucket: "b".into(),
                key: "k".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(SyncError::invalid("bad").status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
