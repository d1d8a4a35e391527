//! Full-replace bulk load of the source table.
//!
//! One session: `DELETE` everything, then upsert the records in batches. The
//! delete commits together with the first batch and every later batch commits
//! on its own, so a failure part-way leaves earlier batches in place.
use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, instrument, warn};

use super::schema::SourceTables;
use crate::record::{FlatProductRecord, COLUMNS, KEY_COLUMN};
use crate::util::db::Db;

pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 1000;

/// Bind-parameter limit of a single Postgres statement.
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Distinct codes in the table after the load.
    pub rows: usize,
    /// Rows sent in upsert statements; repeated codes in different batches
    /// count once per batch.
    pub written: usize,
    pub batches: usize,
}

/// Largest batch whose upsert stays within the bind-parameter limit.
pub const MAX_BATCH_SIZE: usize = MAX_BIND_PARAMS / COLUMNS.len();

/// Clamp a requested batch size to `1..=MAX_BATCH_SIZE`.
pub fn effective_batch_size(requested: usize) -> usize {
    if requested > MAX_BATCH_SIZE {
        warn!(
            requested,
            max = MAX_BATCH_SIZE,
            "batch size exceeds the bind-parameter limit; lowering it"
        );
        MAX_BATCH_SIZE
    } else {
        requested.max(1)
    }
}

fn distinct_codes(records: &[FlatProductRecord]) -> usize {
    records
        .iter()
        .map(|r| r.code.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// `INSERT ... ON CONFLICT (code) DO UPDATE` for one batch. Every non-key
/// column is overwritten and `created_at` is re-stamped.
pub fn upsert_builder<'a>(
    table: &str,
    rows: &[&'a FlatProductRecord],
) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<'a, Postgres> =
        QueryBuilder::new(format!("INSERT INTO {table} ({}) ", COLUMNS.join(", ")));
    qb.push_values(rows.iter().copied(), |mut b, r| {
        b.push_bind(r.code.as_str())
            .push_bind(r.product_name.as_deref())
            .push_bind(r.quantity.as_deref())
            .push_bind(r.brand.as_deref())
            .push_bind(r.categories.as_deref())
            .push_bind(r.ingredients.as_deref())
            .push_bind(r.image_url.as_deref())
            .push_bind(r.nutriscore_grade.as_deref())
            .push_bind(r.energy_100g)
            .push_bind(r.fat_100g)
            .push_bind(r.saturated_fat_100g)
            .push_bind(r.proteins_100g)
            .push_bind(r.carbohydrates_100g)
            .push_bind(r.sugars_100g)
            .push_bind(r.fiber_100g)
            .push_bind(r.sodium_100g);
    });
    let updates: Vec<String> = COLUMNS
        .iter()
        .filter(|c| **c != KEY_COLUMN)
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    qb.push(format!(
        " ON CONFLICT ({KEY_COLUMN}) DO UPDATE SET {}, created_at = now()",
        updates.join(", ")
    ));
    qb
}

/// Collapse repeated codes inside one batch (last occurrence wins, first
/// position kept). Postgres refuses to upsert the same key twice in one
/// statement.
fn unique_by_code(chunk: &[FlatProductRecord]) -> Vec<&FlatProductRecord> {
    let mut slot: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<&FlatProductRecord> = Vec::with_capacity(chunk.len());
    for r in chunk {
        match slot.get(r.code.as_str()) {
            Some(&i) => out[i] = r,
            None => {
                slot.insert(r.code.as_str(), out.len());
                out.push(r);
            }
        }
    }
    out
}

/// Replace the whole source table with `records`.
#[instrument(skip(db, records), fields(table = %tables.source, total = records.len()))]
pub async fn replace_source_table(
    db: &Db,
    tables: &SourceTables,
    records: &[FlatProductRecord],
    batch_size: usize,
) -> Result<LoadSummary> {
    let batch_size = effective_batch_size(batch_size);
    let total = records.len();
    let batches = total.div_ceil(batch_size);

    let mut tx = db.pool.begin().await.context("begin load session")?;
    info!(table = %tables.source, "clearing existing rows");
    sqlx::query(&format!("DELETE FROM {}", tables.source))
        .persistent(false)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("clear {}", tables.source))?;

    let mut summary = LoadSummary::default();
    for (idx, chunk) in records.chunks(batch_size).enumerate() {
        let rows = unique_by_code(chunk);
        let mut qb = upsert_builder(&tables.source, &rows);
        qb.build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("upsert batch {}/{}", idx + 1, batches))?;
        tx.commit()
            .await
            .with_context(|| format!("commit batch {}/{}", idx + 1, batches))?;

        summary.written += rows.len();
        summary.batches += 1;
        info!(
            batch = idx + 1,
            batches,
            rows = rows.len(),
            loaded = (idx * batch_size + chunk.len()).min(total),
            total,
            "source table: batch imported"
        );
        tx = db.pool.begin().await.context("begin next batch")?;
    }
    // Commits the delete when there were no records at all.
    tx.commit().await.context("commit load session")?;
    summary.rows = distinct_codes(records);

    info!(rows = summary.rows, table = %tables.source, "source table replaced");
    Ok(summary)
}
