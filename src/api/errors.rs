//! Shared error-to-response mapping for the HTTP surface.
//!
//! Every failure renders as `{"message": ..., "requestId": ...}` with a fresh
//! correlation id. Authentication failures collapse into one generic 401 body
//! so responses do not reveal which check rejected the request.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use ulid::Ulid;
use utoipa::ToSchema;

use crate::auth::{roles::RoleError, AuthError};
use crate::totp::TotpError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("too many requests")]
    RateLimited { reset: u64 },
    #[error("internal error")]
    Dependency(#[from] anyhow::Error),
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub request_id: String,
}

impl ErrorBody {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            request_id: Ulid::new().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, ErrorBody::new(message)),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::new("Authentication required"),
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, ErrorBody::new("Forbidden")),
            Self::NotFound => (StatusCode::NOT_FOUND, ErrorBody::new("Not found")),
            Self::Conflict(message) => (StatusCode::CONFLICT, ErrorBody::new(message)),
            Self::RateLimited { reset } => {
                let body = ErrorBody::new("Too many requests");
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(&body)).into_response();
                if let Ok(value) = reset.to_string().parse() {
                    response.headers_mut().insert("retry-after", value);
                }
                return response;
            }
            Self::Dependency(err) => {
                let body = ErrorBody::new("Internal error");
                error!(request_id = %body.request_id, "Request failed: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }
        };
        (status, Json(&body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(_: AuthError) -> Self {
        Self::Unauthorized
    }
}

impl From<TotpError> for ApiError {
    fn from(err: TotpError) -> Self {
        match err {
            TotpError::UserNotFound
            | TotpError::NoPendingSetup
            | TotpError::NoActiveSecondFactor => Self::NotFound,
            TotpError::AlreadyEnabled => {
                Self::Conflict("Second factor is already enabled".to_string())
            }
            TotpError::InvalidCode | TotpError::DisableNotAuthorized => Self::Unauthorized,
            TotpError::Dependency(err) => Self::Dependency(err.into()),
            TotpError::Internal(err) => Self::Dependency(err),
        }
    }
}

impl From<RoleError> for ApiError {
    fn from(err: RoleError) -> Self {
        match err {
            RoleError::Dependency(err) => Self::Dependency(err.into()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Dependency(err.into())
    }
}
