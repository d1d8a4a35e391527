use serde::{Deserialize, Serialize};

/// Destination column order. The CSV header and the upsert statement both
/// follow this exact sequence.
pub const COLUMNS: [&str; 16] = [
    "code",
    "product_name",
    "quantity",
    "brand",
    "categories",
    "ingredients",
    "image_url",
    "nutriscore_grade",
    "energy_100g",
    "fat_100g",
    "saturated_fat_100g",
    "proteins_100g",
    "carbohydrates_100g",
    "sugars_100g",
    "fiber_100g",
    "sodium_100g",
];

/// Natural key of the source table.
pub const KEY_COLUMN: &str = "code";

/// One product in the flat schema shared by the scraper output, the CSV file
/// and the `metro_source` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatProductRecord {
    pub code: String,
    pub product_name: Option<String>,
    pub quantity: Option<String>,
    pub brand: Option<String>,
    pub categories: Option<String>,
    pub ingredients: Option<String>,
    pub image_url: Option<String>,
    pub nutriscore_grade: Option<String>,
    pub energy_100g: Option<f64>,
    pub fat_100g: Option<f64>,
    pub saturated_fat_100g: Option<f64>,
    pub proteins_100g: Option<f64>,
    pub carbohydrates_100g: Option<f64>,
    pub sugars_100g: Option<f64>,
    pub fiber_100g: Option<f64>,
    pub sodium_100g: Option<f64>,
}

/// The eight per-100g nutrition values, in column order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Nutrition {
    pub energy_100g: Option<f64>,
    pub fat_100g: Option<f64>,
    pub saturated_fat_100g: Option<f64>,
    pub proteins_100g: Option<f64>,
    pub carbohydrates_100g: Option<f64>,
    pub sugars_100g: Option<f64>,
    pub fiber_100g: Option<f64>,
    pub sodium_100g: Option<f64>,
}

impl FlatProductRecord {
    pub fn with_nutrition(mut self, n: Nutrition) -> Self {
        self.energy_100g = n.energy_100g;
        self.fat_100g = n.fat_100g;
        self.saturated_fat_100g = n.saturated_fat_100g;
        self.proteins_100g = n.proteins_100g;
        self.carbohydrates_100g = n.carbohydrates_100g;
        self.sugars_100g = n.sugars_100g;
        self.fiber_100g = n.fiber_100g;
        self.sodium_100g = n.sodium_100g;
        self
    }

    pub fn has_nutrition(&self) -> bool {
        self.energy_100g.is_some()
    }
}

/// Field coverage over a set of records, logged after every scrape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub products: usize,
    pub with_nutrition: usize,
    pub with_ingredients: usize,
    pub with_image: usize,
}

impl Coverage {
    pub fn of(records: &[FlatProductRecord]) -> Self {
        Self {
            products: records.len(),
            with_nutrition: records.iter().filter(|r| r.has_nutrition()).count(),
            with_ingredients: records.iter().filter(|r| r.ingredients.is_some()).count(),
            with_image: records.iter().filter(|r| r.image_url.is_some()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_start_with_natural_key() {
        assert_eq!(COLUMNS[0], KEY_COLUMN);
        assert_eq!(COLUMNS.len(), 16);
    }

    #[test]
    fn coverage_counts_optional_fields() {
        let records = vec![
            FlatProductRecord {
                code: "1".into(),
                energy_100g: Some(10.0),
                image_url: Some("https://img".into()),
                ..Default::default()
            },
            FlatProductRecord {
                code: "2".into(),
                ingredients: Some("water".into()),
                ..Default::default()
            },
        ];
        let c = Coverage::of(&records);
        assert_eq!(
            c,
            Coverage {
                products: 2,
                with_nutrition: 1,
                with_ingredients: 1,
                with_image: 1,
            }
        );
    }
}
