use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

pub(crate) fn is_valid_barcode(barcode: &str) -> bool {
    lazy_static! {
        static ref BARCODE_RE: Regex = Regex::new(r"^[0-9]{10}$").unwrap();
    }
    BARCODE_RE.is_match(barcode)
}

/// Request body for product creation.
#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub barcode: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    pub cost: i32,
}

/// `?p=<page>&n=<page size>`, 1-indexed.
#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub p: u32,
    #[serde(default = "default_page_size")]
    pub n: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}
