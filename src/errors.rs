use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::object_store::ObjectError;

/// Generic message returned for every 500-class failure.
pub const INTERNAL_MESSAGE: &str = "An unexpected error occurred on the server.";

/// Failure categories surfaced by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed parameters.
    InvalidRequest,
    /// No credential supplied.
    Unauthenticated,
    /// A credential was supplied but matches no user.
    InvalidCredential,
    /// The caller is known but not allowed to touch the resource.
    Forbidden,
    /// Bucket, file, or object absent.
    NotFound,
    /// Object-store failure other than absence.
    StorageFault,
    /// Metadata-store failure or anything unexpected.
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidCredential | ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::StorageFault | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Typed error returned by every pipeline and handler.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    /// Optional machine-readable code, only rendered for non-500 errors.
    pub code: Option<&'static str>,
}

impl AppError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, msg)
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, msg)
    }

    pub fn invalid_credential(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCredential, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn storage_fault(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageFault, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = if status.is_server_error() {
            tracing::error!(kind = ?self.kind, "request failed: {}", self.message);
            json!({ "error": { "message": INTERNAL_MESSAGE } })
        } else {
            tracing::debug!(kind = ?self.kind, "request rejected: {}", self.message);
            match self.code {
                Some(code) => json!({ "error": { "message": self.message, "code": code } }),
                None => json!({ "error": { "message": self.message } }),
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(format!("metadata store: {err}"))
    }
}

impl From<ObjectError> for AppError {
    fn from(err: ObjectError) -> Self {
        match err {
            ObjectError::BucketNotFound(bucket) => {
                AppError::not_found(format!("Bucket \"{bucket}\" does not exist in storage."))
                    .with_code("STORAGE_BUCKET_NOT_FOUND")
            }
            ObjectError::NotFound { .. } => {
                AppError::not_found("File not found in storage.").with_code("STORAGE_NOT_FOUND")
            }
            ObjectError::InvalidKey(_) | ObjectError::InvalidBucketName { .. } => {
                AppError::invalid_request(err.to_string())
            }
            other => AppError::storage_fault(format!("object store: {other}")),
        }
    }
}
