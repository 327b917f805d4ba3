use crate::state::AppState;
use axum::Router;

pub mod handlers;
pub mod render;
pub mod services;
pub mod storage;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::receipt_routes())
}
