//! Field extraction from raw retailer payloads into the flat product schema.

pub mod json;
pub mod nutrition;
pub mod product;

pub use product::{extract_batch, extract_product, BatchExtraction, Rejection};
