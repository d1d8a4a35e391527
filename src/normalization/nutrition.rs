//! Nutrition table extraction.
//!
//! Rows look like `{"rowLabel": "Мазнини", "cells": [{"value": "12.5",
//! "unitOfMeasure": "g"}, ...]}`. Labels are in Bulgarian, so every nutrient
//! is matched by keyword substrings against the lower-cased label. Only the
//! first cell (per 100 g / 100 ml) is read.
use serde_json::Value;
use tracing::debug;

use super::json::{array_field, non_empty_str, value_as_f64};
use crate::record::Nutrition;

pub const KJ_PER_KCAL: f64 = 4.184;

pub const ENERGY: &[&str] = &["енергийна стойност"];
pub const FAT: &[&str] = &["мазнини"];
pub const SATURATED_FAT: &[&str] = &["наситени"];
pub const PROTEINS: &[&str] = &["белтъци"];
pub const CARBOHYDRATES: &[&str] = &["въглехидрати"];
pub const SUGARS: &[&str] = &["захари"];
pub const FIBER: &[&str] = &["влакна", "fiber"];
pub const SODIUM: &[&str] = &["натрий", "sodium"];

/// Units understood by the converter, after alias folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Gram,
    Milligram,
    Kcal,
    Kj,
}

impl Unit {
    /// Fold the declared `unitOfMeasure` into a known unit. Mass units are
    /// matched on their exact Latin spelling only, so a Cyrillic `г` never
    /// triggers a conversion. Unknown or empty spellings yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "g" => Some(Self::Gram),
            "mg" => Some(Self::Milligram),
            "kcal" | "ккал" => Some(Self::Kcal),
            "kj" | "кдж" => Some(Self::Kj),
            _ => None,
        }
    }
}

/// A matched nutrition row: the first cell's value and its declared unit.
#[derive(Debug, Clone, PartialEq)]
struct Cell {
    value: f64,
    unit: Option<Unit>,
    raw_unit: String,
}

/// Scan rows in order and return the first whose label contains any keyword,
/// whose first cell parses as a number, and whose unit passes `accept`.
fn find_cell(
    table: &Value,
    keywords: &[&str],
    accept: impl Fn(Option<Unit>) -> bool,
) -> Option<Cell> {
    for row in array_field(table, "rows") {
        let label = row
            .get("rowLabel")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if !keywords.iter().any(|k| label.contains(k)) {
            continue;
        }
        let Some(cell) = array_field(row, "cells").first() else {
            continue;
        };
        let Some(value) = cell.get("value").and_then(value_as_f64) else {
            continue;
        };
        let raw_unit = non_empty_str(cell, "unitOfMeasure")
            .unwrap_or_default()
            .to_lowercase();
        let unit = Unit::parse(&raw_unit);
        if !accept(unit) {
            continue;
        }
        return Some(Cell {
            value,
            unit,
            raw_unit,
        });
    }
    None
}

/// Convert `value` from the declared unit to `target`.
///
/// Only grams to milligrams is defined. Any other mismatch passes the value
/// through unchanged.
pub fn convert(value: f64, declared: Option<Unit>, target: Unit) -> f64 {
    match (declared, target) {
        (Some(d), t) if d == t => value,
        (Some(Unit::Gram), Unit::Milligram) => value * 1000.0,
        (declared, target) => {
            debug!(
                value,
                ?declared,
                ?target,
                "nutrition: no conversion defined; keeping declared value"
            );
            value
        }
    }
}

/// Value of the first row matching `keywords`, converted toward `target`.
pub fn nutrient_value(table: &Value, keywords: &[&str], target: Unit) -> Option<f64> {
    let cell = find_cell(table, keywords, |_| true)?;
    Some(convert(cell.value, cell.unit, target))
}

/// Energy in kcal. The first energy row not declared in kJ wins; otherwise a
/// kJ row is converted and rounded to one decimal.
pub fn energy_kcal(table: &Value) -> Option<f64> {
    if let Some(cell) = find_cell(table, ENERGY, |u| u != Some(Unit::Kj)) {
        return Some(convert(cell.value, cell.unit, Unit::Kcal));
    }
    let kj = find_cell(table, ENERGY, |u| u == Some(Unit::Kj))?;
    debug!(kj = kj.value, unit = %kj.raw_unit, "nutrition: energy only in kJ; converting");
    Some(round1(kj.value / KJ_PER_KCAL))
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// All eight per-100g values of a `nutritionalTable` object.
pub fn extract_nutrition(table: &Value) -> Nutrition {
    Nutrition {
        energy_100g: energy_kcal(table),
        fat_100g: nutrient_value(table, FAT, Unit::Gram),
        saturated_fat_100g: nutrient_value(table, SATURATED_FAT, Unit::Gram),
        proteins_100g: nutrient_value(table, PROTEINS, Unit::Gram),
        carbohydrates_100g: nutrient_value(table, CARBOHYDRATES, Unit::Gram),
        sugars_100g: nutrient_value(table, SUGARS, Unit::Gram),
        fiber_100g: nutrient_value(table, FIBER, Unit::Gram),
        sodium_100g: nutrient_value(table, SODIUM, Unit::Milligram),
    }
}
