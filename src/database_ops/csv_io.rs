//! CSV interchange for scraped products: the fixed 16-column header, absent
//! values written as empty fields.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use tracing::{info, warn};

use crate::record::{FlatProductRecord, COLUMNS, KEY_COLUMN};

fn fmt_num(v: Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

fn fmt_text(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("")
}

pub fn write_csv(path: &Path, records: &[FlatProductRecord]) -> Result<()> {
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("open {}", path.display()))?;
    wtr.write_record(COLUMNS)?;
    for r in records {
        wtr.write_record([
            r.code.as_str(),
            fmt_text(&r.product_name),
            fmt_text(&r.quantity),
            fmt_text(&r.brand),
            fmt_text(&r.categories),
            fmt_text(&r.ingredients),
            fmt_text(&r.image_url),
            fmt_text(&r.nutriscore_grade),
            fmt_num(r.energy_100g).as_str(),
            fmt_num(r.fat_100g).as_str(),
            fmt_num(r.saturated_fat_100g).as_str(),
            fmt_num(r.proteins_100g).as_str(),
            fmt_num(r.carbohydrates_100g).as_str(),
            fmt_num(r.sugars_100g).as_str(),
            fmt_num(r.fiber_100g).as_str(),
            fmt_num(r.sodium_100g).as_str(),
        ])?;
    }
    wtr.flush()
        .with_context(|| format!("flush {}", path.display()))?;
    info!(rows = records.len(), path = %path.display(), "csv written");
    Ok(())
}

/// Column positions resolved from the header; any column but `code` may be
/// missing.
struct Layout([Option<usize>; 16]);

impl Layout {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let mut idx = [None; 16];
        for (slot, name) in idx.iter_mut().zip(COLUMNS) {
            *slot = headers.iter().position(|h| h.trim() == name);
        }
        if idx[0].is_none() {
            return Err(anyhow!("{KEY_COLUMN} column missing"));
        }
        Ok(Self(idx))
    }

    fn field<'r>(&self, rec: &'r StringRecord, col: usize) -> Option<&'r str> {
        self.0[col]
            .and_then(|i| rec.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn text(&self, rec: &StringRecord, col: usize) -> Option<String> {
        self.field(rec, col).map(str::to_string)
    }

    /// Unparseable numbers become absent rather than failing the row.
    fn num(&self, rec: &StringRecord, col: usize) -> Option<f64> {
        self.field(rec, col)
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|n| n.is_finite())
    }
}

/// Read a product CSV. Rows without a code are dropped.
pub fn read_csv(path: &Path) -> Result<Vec<FlatProductRecord>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));
    let layout = Layout::from_headers(rdr.headers()?)?;

    let mut out = Vec::new();
    let mut dropped = 0usize;
    for (line, row) in rdr.records().enumerate() {
        let rec = row.with_context(|| format!("read row {} of {}", line + 2, path.display()))?;
        let Some(code) = layout.field(&rec, 0) else {
            dropped += 1;
            continue;
        };
        out.push(FlatProductRecord {
            code: code.to_string(),
            product_name: layout.text(&rec, 1),
            quantity: layout.text(&rec, 2),
            brand: layout.text(&rec, 3),
            categories: layout.text(&rec, 4),
            ingredients: layout.text(&rec, 5),
            image_url: layout.text(&rec, 6),
            nutriscore_grade: layout.text(&rec, 7),
            energy_100g: layout.num(&rec, 8),
            fat_100g: layout.num(&rec, 9),
            saturated_fat_100g: layout.num(&rec, 10),
            proteins_100g: layout.num(&rec, 11),
            carbohydrates_100g: layout.num(&rec, 12),
            sugars_100g: layout.num(&rec, 13),
            fiber_100g: layout.num(&rec, 14),
            sodium_100g: layout.num(&rec, 15),
        });
    }
    if dropped > 0 {
        warn!(dropped, "csv rows without code dropped");
    }
    info!(rows = out.len(), path = %path.display(), "csv loaded");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writes_fixed_header_and_empty_absent_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let rec = FlatProductRecord {
            code: "3800123456789".into(),
            product_name: Some("Сирене, краве".into()),
            energy_100g: Some(250.5),
            sodium_100g: Some(400.0),
            ..Default::default()
        };
        write_csv(&path, &[rec.clone()]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "3800123456789,\"Сирене, краве\",,,,,,,250.5,,,,,,,400"
        );
        assert_eq!(read_csv(&path).unwrap(), vec![rec]);
    }

    #[test]
    fn import_drops_missing_codes_and_tolerates_bad_numbers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "code,product_name,energy_100g,fat_100g,sodium_100g").unwrap();
        writeln!(file, "111,Хляб,250,n/a, 12.5 ").unwrap();
        writeln!(file, ",Без код,1,2,3").unwrap();
        writeln!(file, "  ,Празен,1,2,3").unwrap();
        writeln!(file, "222,,,,").unwrap();
        file.flush().unwrap();

        let rows = read_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code, "111");
        assert_eq!(rows[0].energy_100g, Some(250.0));
        assert_eq!(rows[0].fat_100g, None);
        assert_eq!(rows[0].sodium_100g, Some(12.5));
        assert_eq!(rows[0].brand, None);
        assert_eq!(rows[1].code, "222");
        assert_eq!(rows[1].product_name, None);
    }

    #[test]
    fn import_requires_code_column() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "product_name,energy_100g").unwrap();
        writeln!(file, "x,1").unwrap();
        file.flush().unwrap();
        assert!(read_csv(file.path()).is_err());
    }
}
