//! Per-request error types
//!
//! Every handler failure is rendered as
//! `{"error":{"type","message","request_id"}}` with a status derived from
//! the underlying storage or SkyDrive error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use photo_fs::Error as StorageError;
use skydrive::ErrorClassification;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    SkyDrive(#[from] skydrive::Error),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) | Error::Authorization(_) => StatusCode::BAD_REQUEST,
            Error::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Storage(StorageError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            Error::Storage(StorageError::Io(_)) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Storage(StorageError::SkyDrive(e)) | Error::SkyDrive(e) => skydrive_status(e),
        }
    }

    /// Value of `error.type` in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::Authorization(_) => "authorization_error",
            Error::Storage(StorageError::NotFound(_)) => "not_found",
            Error::Storage(StorageError::InvalidPath(_)) => "invalid_request",
            Error::Storage(StorageError::Io(_)) | Error::Io(_) => "storage_error",
            Error::Storage(StorageError::SkyDrive(e)) | Error::SkyDrive(e) => {
                match e.classification() {
                    ErrorClassification::Unauthorized => "skydrive_unauthorized",
                    ErrorClassification::NotFound => "not_found",
                    _ => "skydrive_error",
                }
            }
        }
    }

    pub fn into_response(self, request_id: &str) -> Response {
        error_response(self.status(), self.kind(), &self.to_string(), request_id)
    }
}

/// SkyDrive failures are upstream failures, except a missing object.
/// A rejected or absent token means the operator must authorize again.
fn skydrive_status(e: &skydrive::Error) -> StatusCode {
    match e.classification() {
        ErrorClassification::NotFound => StatusCode::NOT_FOUND,
        ErrorClassification::Unauthorized => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClassification::Transient | ErrorClassification::Permanent => StatusCode::BAD_GATEWAY,
    }
}

pub fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
