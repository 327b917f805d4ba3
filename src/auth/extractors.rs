use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::{auth::token::TokenClient, error::ServiceError, state::AppState};

/// Login of the caller, taken from a bearer token the token service accepted.
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing Authorization header".into()))?;
        let token = bearer_token(header)?;

        // Remote validation must succeed before the unverified claim read below.
        state.tokens.validate_token(token).await.map_err(|e| {
            if e.last.is_rejection() {
                warn!(reason = %e.last, "token rejected");
                ServiceError::Unauthorized(e.last.to_string())
            } else {
                ServiceError::RemoteUnavailable(e)
            }
        })?;

        let login = TokenClient::extract_login(token)
            .map_err(|e| ServiceError::Unauthorized(e.to_string()))?;
        Ok(AuthUser(login))
    }
}

/// Expects exactly `<scheme> <token>` with a case-insensitive `bearer` scheme.
fn bearer_token(header: &str) -> Result<&str, ServiceError> {
    let mut fields = header.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        (Some(scheme), Some(_), None) => Err(ServiceError::Unauthorized(format!(
            "unsupported authorization type {}",
            scheme.to_lowercase()
        ))),
        _ => Err(ServiceError::Unauthorized(
            "invalid authorization header format".into(),
        )),
    }
}
