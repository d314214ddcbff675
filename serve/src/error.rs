//! Structured API errors: `{error: {code, message, retryable, details}}`.
//!
//! The UI never sees stack traces; every failure maps to a stable code
//! and an HTTP status per the error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use skein::retry::is_transient;
use skein::AgentError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation_error",
            message: message.into(),
            retryable: false,
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
            retryable: false,
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "forbidden",
            message: message.into(),
            retryable: false,
            details: None,
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        match &error {
            AgentError::Validation(message) => ApiError::bad_request(message.clone()),
            AgentError::NotFound(message) => ApiError::not_found(message.clone()),
            AgentError::Forbidden(message) => ApiError::forbidden(message.clone()),
            _ => {
                let retryable = is_transient(&error);
                tracing::error!(%error, retryable, "internal error at API boundary");
                Self {
                    status: if retryable {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::INTERNAL_SERVER_ERROR
                    },
                    code: if retryable { "transient" } else { "internal" },
                    message: "internal server error".into(),
                    retryable,
                    details: None,
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "retryable": self.retryable,
                "details": self.details,
            }
        });
        (self.status, Json(body)).into_response()
    }
}
