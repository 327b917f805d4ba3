use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::{
    auth::extractors::AuthUser,
    error::ServiceError,
    products::{
        dto::{is_valid_barcode, CreateProductRequest, Pagination},
        repo_types::{NewProduct, ProductDetails, ProductSummary},
    },
    state::AppState,
};

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/product", post(create_product))
        .route("/product/all", get(list_products))
        .route("/product/:barcode", get(get_product).delete(delete_product))
}

#[instrument(skip(state, payload), fields(barcode = %payload.barcode))]
pub async fn create_product(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
    Json(payload): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Value>), ServiceError> {
    if !is_valid_barcode(&payload.barcode) {
        warn!("invalid barcode");
        return Err(ServiceError::BadRequest("Invalid barcode".into()));
    }
    if payload.name.trim().is_empty() || payload.cost < 0 {
        return Err(ServiceError::BadRequest("Invalid product".into()));
    }

    state
        .products
        .create(
            NewProduct {
                barcode: payload.barcode,
                name: payload.name.trim().to_string(),
                descr: payload.desc,
                cost: payload.cost,
            },
            &login,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "Successfully added" })),
    ))
}

#[instrument(skip(state))]
pub async fn list_products(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<ProductSummary>>, ServiceError> {
    let items = state.products.list(&login, p.p, p.n).await?;
    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn get_product(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
    Path(barcode): Path<String>,
) -> Result<Json<ProductDetails>, ServiceError> {
    Ok(Json(state.products.get(&barcode, &login).await?))
}

#[instrument(skip(state))]
pub async fn delete_product(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
    Path(barcode): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    state.products.delete(&barcode, &login).await?;
    Ok(Json(json!({ "status": "Successfully deleted" })))
}
