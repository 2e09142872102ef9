//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Upstream unavailable ({code}): {detail}")]
    UpstreamUnavailable { code: String, detail: String },

    #[error("Retry budget exhausted: {0}")]
    Exhausted(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable, machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidState(_) => "invalid_state",
            AppError::ValidationFailed(_) => "validation_failed",
            AppError::UpstreamUnavailable { .. } => "upstream_unavailable",
            AppError::Exhausted(_) => "exhausted",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn upstream(code: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::UpstreamUnavailable {
            code: code.into(),
            detail: detail.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            AppError::Exhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let detail = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                e.clone()
            }
            AppError::UpstreamUnavailable { code, detail } => {
                tracing::warn!("Upstream unavailable ({}): {}", code, detail);
                format!("{}: {}", code, detail)
            }
            AppError::Exhausted(e) => {
                tracing::warn!("Retry budget exhausted: {}", e);
                e.clone()
            }
            AppError::Unauthorized(e)
            | AppError::Forbidden(e)
            | AppError::NotFound(e)
            | AppError::Conflict(e)
            | AppError::InvalidState(e)
            | AppError::ValidationFailed(e) => e.clone(),
        };

        let body = serde_json::json!({
            "error": self.kind(),
            "detail": detail,
        });

        (self.status_code(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("task".to_string());
        assert_eq!(format!("{}", err), "Not found: task");

        let err = AppError::Conflict("already assigned".to_string());
        assert_eq!(format!("{}", err), "Conflict: already assigned");

        let err = AppError::upstream("upstream_503", "service down");
        assert_eq!(
            format!("{}", err),
            "Upstream unavailable (upstream_503): service down"
        );

        let err = AppError::Internal("something broke".to_string());
        assert_eq!(format!("{}", err), "Internal error: something broke");
    }

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(AppError::Unauthorized(String::new()).kind(), "unauthorized");
        assert_eq!(AppError::Forbidden(String::new()).kind(), "forbidden");
        assert_eq!(AppError::InvalidState(String::new()).kind(), "invalid_state");
        assert_eq!(
            AppError::ValidationFailed(String::new()).kind(),
            "validation_failed"
        );
        assert_eq!(AppError::Exhausted(String::new()).kind(), "exhausted");
        assert_eq!(
            AppError::upstream("provider_not_configured", "").kind(),
            "upstream_unavailable"
        );
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (AppError::InvalidState("x".into()), StatusCode::CONFLICT),
            (
                AppError::ValidationFailed("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AppError::upstream("upstream_500", "x"), StatusCode::BAD_GATEWAY),
            (AppError::Exhausted("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                AppError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_database_error_from_sqlx() {
        let sqlx_err = sqlx::Error::Configuration("test".into());
        let app_err: AppError = sqlx_err.into();
        assert!(matches!(app_err, AppError::Database(_)));
        assert_eq!(
            app_err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn test_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(test_fn().unwrap(), 42);

        fn test_err_fn() -> Result<i32> {
            Err(AppError::NotFound("test".to_string()))
        }
        assert!(test_err_fn().is_err());
    }
}
