use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Receipt filenames returned with a product's details.
pub const MAX_CHECKS_PER_PRODUCT: i64 = 100;

/// Product data supplied by its owner on creation.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub barcode: String, // exactly ten digits, checked upstream
    pub name: String,
    pub descr: String,
    pub cost: i32,
}

/// Full product row as visible to its owner.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Product {
    pub barcode: String,
    pub name: String,
    pub descr: String,
    pub cost: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

/// Projection used by listings and receipt rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct ProductSummary {
    pub barcode: String,
    pub name: String,
    pub cost: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetails {
    #[serde(flatten)]
    pub product: Product,
    pub checks: Vec<String>,
}

/// Lifecycle of a check row: reserved before the file is written,
/// committed once the bytes are durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pending,
    Committed,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pending => "pending",
            CheckStatus::Committed => "committed",
        }
    }
}
