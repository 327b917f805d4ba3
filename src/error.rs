use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::{
    auth::token::TokenError, db::StoreError, receipts::render::RenderError,
    retry::RetryExhausted,
};

/// Error kinds returned by every service operation.
///
/// `NotFound` deliberately covers both "absent" and "not yours" for
/// products and receipts so callers cannot probe ownership.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("token service unavailable: {0}")]
    RemoteUnavailable(#[source] RetryExhausted<TokenError>),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound | StoreError::OwnerNotFound => ServiceError::NotFound,
            StoreError::DuplicateLogin => ServiceError::Conflict("user"),
            StoreError::DuplicateBarcode => ServiceError::Conflict("product"),
            StoreError::DuplicateFilename => ServiceError::Conflict("check"),
            StoreError::Timeout => ServiceError::Internal(anyhow::anyhow!("database call timed out")),
            StoreError::Db(e) => ServiceError::Internal(anyhow::Error::new(e).context("database")),
        }
    }
}

impl From<RenderError> for ServiceError {
    fn from(e: RenderError) -> Self {
        match e {
            err @ RenderError::Unprintable(_) => ServiceError::BadRequest(err.to_string()),
            RenderError::Pdf(e) => {
                ServiceError::Internal(anyhow::Error::new(e).context("render receipt"))
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ServiceError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ServiceError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ServiceError::Conflict(what) => {
                (StatusCode::CONFLICT, format!("Such {what} already exists"))
            }
            ServiceError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Wrong login or password".to_string())
            }
            ServiceError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason.clone()),
            ServiceError::RemoteUnavailable(e) => {
                error!(error = %e, "token service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Authentication service unavailable".to_string(),
                )
            }
            ServiceError::Internal(e) => {
                error!(error = ?e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "status": "Error", "message": msg }))).into_response()
    }
}
