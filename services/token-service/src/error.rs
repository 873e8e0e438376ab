//! HTTP error responses for the operator endpoints

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failure of an operator request, rendered as `{"success": false, "error": ...}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Token(#[from] token_lifecycle::Error),

    /// Store or affiliate endpoint failure
    #[error(transparent)]
    Auth(#[from] creator_auth::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use token_lifecycle::Error as TokenError;

        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Token(TokenError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Token(TokenError::NeedsReauth(_)) => StatusCode::CONFLICT,
            ApiError::Token(TokenError::RefreshExhausted { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(creator_auth::Error::InvalidCredentials(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Auth(
                creator_auth::Error::Http(_)
                | creator_auth::Error::RateLimited(_)
                | creator_auth::Error::TokenExchange(_),
            ) => StatusCode::BAD_GATEWAY,
            ApiError::Auth(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            serde_json::json!({
                "success": false,
                "error": self.to_string(),
            })
            .to_string(),
        )
            .into_response()
    }
}
