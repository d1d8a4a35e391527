//! Raw METRO article payload -> [`FlatProductRecord`].
//!
//! Payload shape (only the parts read here):
//!
//! ```text
//! article
//! └── variants{id → variant}
//!     └── bundles{id → bundle}
//!         ├── eanNumber[] / gtins[]  { number }
//!         ├── description, brandName, imageUrl, imageUrlL
//!         ├── contentData.netPieceWeight { value, uom }
//!         ├── categories[] { levels[] { displayName } }
//!         └── details
//!             ├── features[] { featureType, leafs[] { label, metaInfo } }
//!             └── nutritionalTable { rows[] }
//! ```
//!
//! Only the first variant and the first bundle are consulted.
use itertools::Itertools;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::json::{array_field, first_entry, non_empty_str, scalar_text};
use super::nutrition::extract_nutrition;
use crate::record::FlatProductRecord;

const INGREDIENT_FEATURE: &str = "ingredientStatement";
const INGREDIENT_BOILERPLATE: [&str; 3] = ["INGREDIENTS", "(", ")"];
const CATEGORY_LEVEL_SEP: &str = " > ";
const CATEGORY_ENTRY_SEP: &str = " | ";

/// Why a raw article did not produce a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("article has no variants")]
    NoVariants,
    #[error("first variant has no bundles")]
    NoBundles,
    #[error("bundle has no EAN/GTIN barcode")]
    MissingBarcode,
}

/// Build the flat record for one article, or say why it was rejected.
pub fn extract_product(article: &Value) -> Result<FlatProductRecord, Rejection> {
    let variant = article
        .get("variants")
        .and_then(first_entry)
        .ok_or(Rejection::NoVariants)?;
    let bundle = variant
        .get("bundles")
        .and_then(first_entry)
        .ok_or(Rejection::NoBundles)?;

    let code = barcode(bundle).ok_or(Rejection::MissingBarcode)?;

    let details = bundle.get("details");
    let ingredients = details.and_then(|d| ingredients(array_field(d, "features")));
    let nutrition = details
        .and_then(|d| d.get("nutritionalTable"))
        .filter(|t| t.is_object())
        .map(extract_nutrition)
        .unwrap_or_default();

    let record = FlatProductRecord {
        code,
        product_name: non_empty_str(bundle, "description").map(str::to_string),
        quantity: quantity(bundle),
        brand: non_empty_str(bundle, "brandName").map(str::to_string),
        categories: categories(array_field(bundle, "categories")),
        ingredients,
        image_url: non_empty_str(bundle, "imageUrl")
            .or_else(|| non_empty_str(bundle, "imageUrlL"))
            .map(str::to_string),
        nutriscore_grade: None,
        ..Default::default()
    };
    Ok(record.with_nutrition(nutrition))
}

/// First EAN number, falling back to the GTIN list when there are no EANs.
fn barcode(bundle: &Value) -> Option<String> {
    let eans = array_field(bundle, "eanNumber");
    let list = if eans.is_empty() {
        array_field(bundle, "gtins")
    } else {
        eans
    };
    list.first()
        .and_then(|entry| entry.get("number"))
        .and_then(scalar_text)
}

/// `"<value> <uom>"` from the net piece weight; absent without a value.
fn quantity(bundle: &Value) -> Option<String> {
    let weight = bundle.get("contentData")?.get("netPieceWeight")?;
    let value = weight.get("value").and_then(scalar_text)?;
    let uom = non_empty_str(weight, "uom").unwrap_or_default();
    Some(format!("{value} {uom}").trim().to_string())
}

/// `"Food > Dairy > Milk | Offers > Weekly"`; absent when no level names.
fn categories(entries: &[Value]) -> Option<String> {
    let parts: Vec<String> = entries
        .iter()
        .map(|entry| {
            array_field(entry, "levels")
                .iter()
                .filter_map(|level| non_empty_str(level, "displayName"))
                .join(CATEGORY_LEVEL_SEP)
        })
        .filter(|joined| !joined.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(CATEGORY_ENTRY_SEP))
}

/// Ingredient statement text from the first `ingredientStatement` feature
/// that has usable leaves.
fn ingredients(features: &[Value]) -> Option<String> {
    features
        .iter()
        .filter(|f| f.get("featureType").and_then(Value::as_str) == Some(INGREDIENT_FEATURE))
        .map(|f| {
            array_field(f, "leafs")
                .iter()
                .filter(|leaf| {
                    let meta = leaf.get("metaInfo").and_then(Value::as_str).unwrap_or("");
                    meta.is_empty() || meta == "Contains"
                })
                .filter_map(|leaf| non_empty_str(leaf, "label"))
                .filter(|label| !INGREDIENT_BOILERPLATE.contains(label))
                .join(" ")
        })
        .find(|joined| !joined.is_empty())
}

/// Extraction outcome for one detail batch.
#[derive(Debug, Default)]
pub struct BatchExtraction {
    pub records: Vec<FlatProductRecord>,
    pub rejected: usize,
}

/// Run [`extract_product`] over every `(article_id, payload)` pair. Rejections
/// are logged and counted; they never stop the batch.
pub fn extract_batch<'a, I>(articles: I) -> BatchExtraction
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let mut out = BatchExtraction::default();
    for (article_id, payload) in articles {
        match extract_product(payload) {
            Ok(record) => out.records.push(record),
            Err(Rejection::MissingBarcode) => {
                debug!(article_id = %article_id, "metro: skipping article without barcode");
                out.rejected += 1;
            }
            Err(reason) => {
                warn!(article_id = %article_id, %reason, "metro: article rejected");
                out.rejected += 1;
            }
        }
    }
    out
}
