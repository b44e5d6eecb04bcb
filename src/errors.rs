use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Top-level application error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Storage errors ───────────────────────────────────────────────────────
    #[error("Database connection failed: {0}")]
    DatabaseConnectionFailed(#[source] sqlx::Error),

    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    #[error("Failed to encode topic '{id}': {source}")]
    TopicEncoding {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Topic '{id}' not found")]
    TopicNotFound { id: String },

    // ── Completion gateway errors ────────────────────────────────────────────
    #[error("Completion service unavailable at {endpoint}")]
    UpstreamUnavailable { endpoint: String },

    #[error("Conversation exceeds the model context length: {message}")]
    ContextTooLarge { message: String },

    /// The upstream message is logged where the error is raised and kept out of `Display`.
    #[error("Completion service request failed")]
    UpstreamFailure { message: String },

    #[error("Completion service produced no reply")]
    NoReply,

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' is invalid: {reason}")]
    InvalidField { field_name: String, reason: String },

    #[error("Malformed request body: {message}")]
    MalformedBody { message: String },

    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Configuration '{key}' is required")]
    MissingConfig { key: String },

    #[error("Configuration '{key}' has invalid value '{value}'")]
    InvalidConfig { key: String, value: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn empty_field(field_name: impl Into<String>) -> Self {
        AppError::EmptyField { field_name: field_name.into() }
    }

    pub fn invalid_field(field_name: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::InvalidField { field_name: field_name.into(), reason: reason.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::TopicNotFound { .. } | AppError::NoReply)
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::InvalidField { .. }
                | AppError::MalformedBody { .. }
                | AppError::ContextTooLarge { .. }
        )
    }

    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, AppError::UpstreamUnavailable { .. })
    }

    pub fn status(&self) -> StatusCode {
        if self.is_validation() {
            StatusCode::BAD_REQUEST
        } else if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_upstream_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else if matches!(self, AppError::UpstreamFailure { .. }) {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    /// The sanitized view of this error that is allowed to cross the wire.
    pub fn problem(&self) -> Problem {
        let status = self.status();
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "The server failed to complete the request".to_string()
        } else {
            self.to_string()
        };
        Problem::new(status, detail)
    }
}

/// RFC 7807 problem details body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl Problem {
    pub const CONTENT_TYPE: &'static str = "application/problem+json";

    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            kind: "about:blank".to_string(),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status, self.title, self.detail)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, axum::Json(self)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(Problem::CONTENT_TYPE),
        );
        response
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            error!("Request failed: {self:?}");
        }
        self.problem().into_response()
    }
}
