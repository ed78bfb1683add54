//! Error types for dirview.
//!
//! This module defines all error types used throughout the library.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Result type alias for dirview operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Result type alias for directory gateway operations.
pub type DirResult<T> = std::result::Result<T, DirectoryError>;

/// Errors surfaced by the directory gateway, normalized from LDAP result codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// No entry exists at the requested DN
    #[error("entry not found")]
    NotFound,

    /// An entry already exists at the DN of an add
    #[error("entry already exists")]
    Conflict,

    /// The attributes violate the entry's object classes
    #[error("schema violation: {0}")]
    Schema(String),

    /// Bind failed because the credentials are wrong
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The operation exceeded the configured timeout
    #[error("operation timed out")]
    Timeout,

    /// Connection or protocol failure
    #[error("transport failure: {0}")]
    Transport(String),
}

impl DirectoryError {
    /// Stable name of the error kind, attached to upstream error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            DirectoryError::NotFound => "NotFound",
            DirectoryError::Conflict => "Conflict",
            DirectoryError::Schema(_) => "Schema",
            DirectoryError::InvalidCredentials => "InvalidCredentials",
            DirectoryError::Timeout => "Timeout",
            DirectoryError::Transport(_) => "Transport",
        }
    }
}

/// Path-structured validation message tree.
///
/// Group wrappers prepend their key, so the final payload names the full
/// path of the offending field (`{group: {field: message}}`).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldErrors {
    Simple(String),
    Nested(BTreeMap<String, FieldErrors>),
}

impl FieldErrors {
    pub fn simple(message: impl Into<String>) -> Self {
        FieldErrors::Simple(message.into())
    }

    /// Wraps this tree one level deeper under `key`.
    pub fn nest(self, key: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(key.into(), self);
        FieldErrors::Nested(map)
    }
}

/// Main error type for dirview operations.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Field-level validation failure; the tree names the offending path
    #[error("validation failed")]
    Validation(FieldErrors),

    /// Authenticated, but lacking the required permission
    #[error("insufficient permissions")]
    Forbidden,

    /// Missing, expired, or invalid credentials
    #[error("authentication required")]
    Unauthorized,

    /// Unknown view or DN
    #[error("not found")]
    NotFound,

    /// Target entry already exists
    #[error("already exists")]
    Conflict,

    /// Request body exceeds the configured limit
    #[error("request body too large")]
    PayloadTooLarge,

    /// POST/PUT/PATCH body is not JSON
    #[error("unsupported media type")]
    UnsupportedMediaType,

    /// The client does not accept JSON responses
    #[error("not acceptable")]
    NotAcceptable,

    /// Directory failure other than a missing or duplicate entry
    #[error("upstream directory error: {0}")]
    Directory(DirectoryError),

    /// Mail delivery failure
    #[error("mailer error: {0}")]
    Mailer(String),

    /// Configuration error (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Validation error with a single flat message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Validation(FieldErrors::simple(message))
    }

    /// Validation error already attributed to a field key.
    pub fn field(key: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Validation(FieldErrors::simple(message).nest(key))
    }

    /// Prepends `key` to the path of a validation error; other kinds pass
    /// through untouched.
    pub fn nest(self, key: &str) -> Self {
        match self {
            ApiError::Validation(tree) => ApiError::Validation(tree.nest(key)),
            other => other,
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => ApiError::NotFound,
            DirectoryError::Conflict => ApiError::Conflict,
            other => ApiError::Directory(other),
        }
    }
}

impl From<serde_yaml::Error> for ApiError {
    fn from(err: serde_yaml::Error) -> Self {
        ApiError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Config(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            ApiError::Directory(_) => StatusCode::BAD_REQUEST,
            ApiError::Mailer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = serde_json::json!({
            "title": status.canonical_reason().unwrap_or("Error"),
            "description": self.to_string(),
        });
        match &self {
            ApiError::Validation(tree) => {
                body["field"] = serde_json::to_value(tree).unwrap_or_default();
            }
            ApiError::Directory(err) => {
                body["kind"] = serde_json::Value::String(err.kind().to_string());
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
