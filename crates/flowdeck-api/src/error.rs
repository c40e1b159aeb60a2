use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use flowdeck_core::{FlowDeckError, SecurityError};
use flowdeck_store::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] FlowDeckError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests, try again later")]
    TooManyRequests,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(what: &str, id: i64) -> Self {
        Self::NotFound(format!("{what} {id}"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(err) => match err {
                FlowDeckError::Validation(_) | FlowDeckError::InvalidValue(_) => {
                    StatusCode::BAD_REQUEST
                }
                FlowDeckError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
                FlowDeckError::Forbidden(_) => StatusCode::FORBIDDEN,
                FlowDeckError::NotFound(_) => StatusCode::NOT_FOUND,
                FlowDeckError::Conflict(_) => StatusCode::CONFLICT,
                FlowDeckError::Security(
                    SecurityError::InvalidCredentials | SecurityError::InvalidToken,
                ) => StatusCode::UNAUTHORIZED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Store(err) => match err {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Conflict(_) => StatusCode::CONFLICT,
                StoreError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SecurityError> for ApiError {
    fn from(err: SecurityError) -> Self {
        ApiError::Core(FlowDeckError::Security(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the log.
        let error_message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_http_status() {
        assert_eq!(
            ApiError::from(StoreError::Conflict("dup".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(StoreError::not_found("task", 1)).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn security_errors_are_unauthorized() {
        assert_eq!(
            ApiError::from(SecurityError::InvalidToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(FlowDeckError::validation("bad")).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
