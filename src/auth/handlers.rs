use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{SignInRequest, SignUpRequest, TokenResponse},
        services::NewAccount,
    },
    error::ServiceError,
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/reg", post(sign_up))
        .route("/auth/auth", post(sign_in))
}

#[instrument(skip(state, payload), fields(login = %payload.login))]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<Value>), ServiceError> {
    let login = payload.login.trim().to_string();
    let email = payload.email.trim().to_lowercase();
    if !(3..=40).contains(&login.chars().count()) {
        return Err(ServiceError::BadRequest("Login must be 3 to 40 characters".into()));
    }
    if payload.password.is_empty() {
        return Err(ServiceError::BadRequest("Password is required".into()));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ServiceError::BadRequest("Invalid email".into()));
    }

    state
        .identity
        .sign_up(NewAccount {
            login: login.clone(),
            full_name: payload.full_name,
            email,
            password: payload.password,
        })
        .await?;

    info!(login = %login, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "Successfully registered" })),
    ))
}

#[instrument(skip(state, payload), fields(login = %payload.login))]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<TokenResponse>, ServiceError> {
    let token = state
        .identity
        .sign_in(payload.login.trim(), &payload.password)
        .await?;
    Ok(Json(TokenResponse { token }))
}
