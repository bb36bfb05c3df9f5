use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use efu_core::{RuleError, ValidationError};

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    pub error: String,
    pub message: String,
    /// Offending fields for validation errors, empty otherwise.
    pub fields: Vec<String>,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn validation(err: ValidationError) -> Self {
        Self {
            fields: err.fields,
            ..Self::new(StatusCode::BAD_REQUEST, "validation_error", err.message)
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::validation(err)
    }
}

impl From<RuleError> for ApiError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NotFound { .. } => Self::not_found(err.to_string()),
            RuleError::Validation(validation) => Self::validation(validation),
            other => {
                tracing::error!(error = %other, "rule store failure");
                Self::internal("Internal server error")
            }
        }
    }
}

/// Body data errors that name a field become validation errors on that field.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        let field = match &rejection {
            JsonRejection::JsonDataError(_) => offending_field(&message),
            _ => None,
        };
        match field {
            Some(field) => Self::validation(ValidationError::field(field, message)),
            None => Self::bad_request(message),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

/// Ids that do not parse cannot name an existing record.
impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::not_found(rejection.body_text())
    }
}

/// Field path from a body data error, e.g. `rules[0].pattern`.
///
/// The message carries the location as `<path>: <error>`, and a missing field
/// names itself inside the error.
fn offending_field(message: &str) -> Option<String> {
    let detail = message
        .split_once(": ")
        .map_or(message, |(_, detail)| detail);
    let (path, error) = match detail.split_once(": ") {
        Some((path, error)) if !path.contains(' ') => (Some(path), error),
        _ => (None, detail),
    };

    let missing = error
        .split_once("missing field `")
        .and_then(|(_, rest)| rest.split_once('`'))
        .map(|(field, _)| field);

    match (path, missing) {
        (Some(path), Some(field)) => Some(format!("{path}.{field}")),
        (None, Some(field)) => Some(field.to_string()),
        (Some(path), None) => Some(path.to_string()),
        (None, None) => None,
    }
}
