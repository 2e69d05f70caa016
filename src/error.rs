use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use thiserror::Error;

use crate::render;
use crate::server::urls;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input error.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The view needs a logged-in user. Carries the path to come back to.
    #[error("Login required for {next}")]
    LoginRequired {
        /// Original request path and query.
        next: String,
    },

    /// The user lacks the named permission.
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// The operation conflicts with existing data.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            AppError::LoginRequired { next } => {
                tracing::debug!(next = %next, "Redirecting anonymous user to login");
                let mut response = Redirect::to(&urls::login_with_next(next)).into_response();
                response
                    .headers_mut()
                    .insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"));
                return response;
            }
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request error");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        // Internal details stay in the log.
        let message = if status.is_server_error() {
            "Something went wrong on our side.".to_string()
        } else {
            self.to_string()
        };

        (status, Html(render::error_page(status, &message))).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
