use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use tracing::instrument;

use crate::{auth::extractors::AuthUser, error::ServiceError, state::AppState};

pub fn receipt_routes() -> Router<AppState> {
    Router::new()
        .route("/product/:barcode/check", get(generate_receipt))
        .route("/product/check/:filename", get(get_receipt))
}

fn pdf(filename: &str, bytes: Bytes) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
}

#[instrument(skip(state))]
pub async fn generate_receipt(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
    Path(barcode): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let receipt = state.receipts.generate(&barcode, &login).await?;
    Ok(pdf(&receipt.filename, receipt.bytes))
}

#[instrument(skip(state))]
pub async fn get_receipt(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let bytes = state.receipts.fetch(&filename, &login).await?;
    Ok(pdf(&filename, bytes))
}
