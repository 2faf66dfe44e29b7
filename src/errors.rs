use crate::services::{
    blob_service::BlobError, catalog_service::CatalogError, session_service::SessionError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for handler errors that keeps the message local.
///
/// Every failure leaves the service as `{"success": false, "error": ...}`;
/// password-gate failures additionally carry `"requiresPassword": true` so
/// the client knows to prompt instead of reporting a hard error.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub requires_password: bool,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            requires_password: false,
        }
    }

    /// Shortcut for a 400 Bad Request.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": self.message,
            "status": self.status.as_u16()
        });
        if self.requires_password {
            body["requiresPassword"] = json!(true);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            SessionError::IncompleteUpload { .. }
            | SessionError::ChunkIndexOutOfRange { .. }
            | SessionError::ChunkCountMismatch { .. }
            | SessionError::EmptyChunkCount => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.to_string())
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::PasswordRequired | CatalogError::InvalidPassword => {
                StatusCode::UNAUTHORIZED
            }
            CatalogError::MetadataConflict(_)
            | CatalogError::GroupAlreadyExists(_)
            | CatalogError::ViewIdTaken(_) => StatusCode::CONFLICT,
            CatalogError::Corrupt { .. } | CatalogError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let mut wrapped = Self::new(status, err.to_string());
        wrapped.requires_password = matches!(err, CatalogError::PasswordRequired);
        wrapped
    }
}

impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, err.to_string())
    }
}
