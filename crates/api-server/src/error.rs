//! API error types and handling.

use auth::rate_limit::RateLimitStatus;
use auth::{AccessError, AuditFailure};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Access refused by the permission resolver.
    #[error("Forbidden: {message}")]
    Forbidden {
        message: String,
        failure: Option<AuditFailure>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{message}")]
    RateLimited {
        message: String,
        status: RateLimitStatus,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid JSON: {0}")]
    JsonRejection(String),
}

impl ApiError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::JsonRejection(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden { .. } => "FORBIDDEN",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::JsonRejection(_) => "INVALID_JSON",
        }
    }

    /// Outcome recorded by the audit middleware for this error.
    pub fn audit_failure(&self) -> AuditFailure {
        match self {
            ApiError::Forbidden {
                failure: Some(failure),
                ..
            } => failure.clone(),
            other => AuditFailure::Failed {
                reason: other.to_string(),
            },
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        if err.is_denial() {
            return ApiError::Forbidden {
                message: err.to_string(),
                failure: Some(AuditFailure::from_error(&err)),
            };
        }

        let message = err.to_string();
        match err {
            AccessError::RateLimitExceeded { status } | AccessError::RequestTooFrequent { status } => {
                ApiError::RateLimited { message, status }
            }
            AccessError::RoleNotFound(_) | AccessError::RolePermissionNotFound(_) => {
                ApiError::NotFound(message)
            }
            AccessError::RoleExists(_) | AccessError::SystemRoleProtected(_) => {
                ApiError::Conflict(message)
            }
            AccessError::Validation(message) => ApiError::Validation(message),
            AccessError::StoreUnavailable(e) => {
                tracing::error!(error = %e, "Backing store unavailable");
                ApiError::ServiceUnavailable("Access control store unavailable".to_string())
            }
            _ => ApiError::Internal(message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(error = %rejection, "JSON parsing failed");
        ApiError::JsonRejection(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Client errors are not logged here
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(
                error_code = self.error_code(),
                error = %self,
                "Internal server error"
            );
        }

        let failure = self.audit_failure();
        let mut body = ErrorResponse::new(self.error_code(), self.to_string());
        let mut rate_headers = None;
        if let ApiError::RateLimited { status, .. } = &self {
            body = body.with_details(json!({
                "limit": status.limit,
                "windowSecs": status.window_secs(),
                "resetAt": status.reset_epoch_secs(),
            }));
            rate_headers = Some(status.headers());
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(headers) = rate_headers {
            apply_headers(&mut response, headers);
        }
        response.extensions_mut().insert(failure);
        response
    }
}

/// Copy `(name, value)` pairs onto a response, skipping unencodable values.
pub fn apply_headers<I>(response: &mut Response, headers: I)
where
    I: IntoIterator<Item = (&'static str, String)>,
{
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use auth::rate_limit::HEADER_REMAINING;
    use backoffice_core::types::{AuditAction, Permission, Resource};

    #[test]
    fn test_denial_maps_to_forbidden_with_audit() {
        let err: ApiError = AccessError::PermissionDenied {
            resource: Resource::Users,
            permission: Permission::Delete,
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let response = err.into_response();
        match response.extensions().get::<AuditFailure>() {
            Some(AuditFailure::Denied { action, .. }) => {
                assert_eq!(*action, AuditAction::PermissionDenied)
            }
            other => panic!("unexpected audit failure: {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_sets_headers() {
        let status = RateLimitStatus {
            limit: 5,
            remaining: 0,
            count: 5,
            reset_at_ms: 1_700_000_900_000,
            window_ms: 900_000,
        };
        let err: ApiError = AccessError::RateLimitExceeded { status }.into();
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[HEADER_REMAINING], "0");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::NotFound("x".into()).error_code(), "NOT_FOUND");
        assert_eq!(
            ApiError::from(AccessError::RoleExists("OPS".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(AccessError::Validation("empty".into())).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(AccessError::StoreUnavailable(backoffice_core::Error::Cache {
                message: "down".into()
            }))
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
