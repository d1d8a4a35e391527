//! Source-membership registry reconciliation.
//!
//! The registry maps each barcode to the set of upstream sources that list it.
//! After a load, every code present in the source table must carry this
//! source's tag: existing registry rows get the tag appended, unknown codes get
//! a new row. Both statements are guarded so a second run changes nothing.
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument};

use super::schema::SourceTables;
use crate::util::db::Db;

pub const DEFAULT_STATEMENT_TIMEOUT: &str = "10min";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: i64,
    pub with_tag: i64,
    pub multi_source: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub tagged: u64,
    pub inserted: u64,
    pub stats: RegistryStats,
}

impl ReconcileSummary {
    pub fn changed(&self) -> u64 {
        self.tagged + self.inserted
    }
}

fn tag_existing_sql(tables: &SourceTables) -> String {
    format!(
        "UPDATE {registry} AS fis
         SET sources = array_append(fis.sources, $1::varchar)
         WHERE EXISTS (SELECT 1 FROM {source} m WHERE m.code = fis.code)
           AND NOT ($1::varchar = ANY (fis.sources))",
        registry = tables.registry,
        source = tables.source,
    )
}

fn insert_new_sql(tables: &SourceTables) -> String {
    format!(
        "INSERT INTO {registry} (code, sources)
         SELECT m.code, ARRAY[$1::varchar]
         FROM {source} m
         WHERE NOT EXISTS (SELECT 1 FROM {registry} fis WHERE fis.code = m.code)",
        registry = tables.registry,
        source = tables.source,
    )
}

/// `SET LOCAL` does not take bind parameters; keep the literal quoted.
fn statement_timeout_sql(timeout: &str) -> String {
    format!(
        "SET LOCAL statement_timeout = '{}'",
        timeout.replace('\'', "''")
    )
}

/// Run both reconciliation steps, each in its own committed transaction, then
/// gather registry statistics.
#[instrument(skip(db), fields(registry = %tables.registry, tag = %tables.tag))]
pub async fn reconcile_registry(
    db: &Db,
    tables: &SourceTables,
    statement_timeout: &str,
) -> Result<ReconcileSummary> {
    let index_name = format!("tmp_{}_code", tables.source_basename());
    info!(index = %index_name, "ensuring index on source codes");
    sqlx::raw_sql(&format!(
        "CREATE INDEX IF NOT EXISTS {index_name} ON {}(code)",
        tables.source
    ))
    .execute(&db.pool)
    .await
    .context("create source code index")?;

    info!("tagging existing registry rows");
    let mut tx = db.pool.begin().await?;
    sqlx::raw_sql(&statement_timeout_sql(statement_timeout))
        .execute(&mut *tx)
        .await
        .context("set statement_timeout")?;
    let tagged = sqlx::query(&tag_existing_sql(tables))
        .persistent(false)
        .bind(&tables.tag)
        .execute(&mut *tx)
        .await
        .context("tag existing registry rows")?
        .rows_affected();
    tx.commit().await.context("commit registry tagging")?;
    info!(tagged, "updated existing registry rows with source tag");

    info!("inserting new registry rows");
    let mut tx = db.pool.begin().await?;
    sqlx::raw_sql(&statement_timeout_sql(statement_timeout))
        .execute(&mut *tx)
        .await
        .context("set statement_timeout")?;
    let inserted = sqlx::query(&insert_new_sql(tables))
        .persistent(false)
        .bind(&tables.tag)
        .execute(&mut *tx)
        .await
        .context("insert new registry rows")?
        .rows_affected();
    tx.commit().await.context("commit registry inserts")?;
    info!(inserted, "inserted registry rows for newly seen codes");

    let stats = registry_stats(db, tables).await?;
    info!(
        total = stats.total,
        with_tag = stats.with_tag,
        multi_source = stats.multi_source,
        "registry statistics"
    );
    Ok(ReconcileSummary {
        tagged,
        inserted,
        stats,
    })
}

/// Counts over the registry: all rows, rows carrying this source's tag, rows
/// with more than one source.
pub async fn registry_stats(db: &Db, tables: &SourceTables) -> Result<RegistryStats> {
    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", tables.registry))
        .persistent(false)
        .fetch_one(&db.pool)
        .await?;
    let with_tag: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE $1::varchar = ANY(sources)",
        tables.registry
    ))
    .persistent(false)
    .bind(&tables.tag)
    .fetch_one(&db.pool)
    .await?;
    let multi_source: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE array_length(sources, 1) > 1",
        tables.registry
    ))
    .persistent(false)
    .fetch_one(&db.pool)
    .await?;
    Ok(RegistryStats {
        total,
        with_tag,
        multi_source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_guard_against_repeats() {
        let t = SourceTables::default();
        let tag = tag_existing_sql(&t);
        assert!(tag.contains("UPDATE public.food_item_sources AS fis"));
        assert!(tag.contains("NOT ($1::varchar = ANY (fis.sources))"));
        assert!(tag.contains("FROM public.metro_source m"));

        let ins = insert_new_sql(&t);
        assert!(ins.contains("INSERT INTO public.food_item_sources (code, sources)"));
        assert!(ins.contains("WHERE NOT EXISTS"));
    }

    #[test]
    fn timeout_literal_is_quoted() {
        assert_eq!(
            statement_timeout_sql("10min"),
            "SET LOCAL statement_timeout = '10min'"
        );
        assert_eq!(
            statement_timeout_sql("1'; DROP"),
            "SET LOCAL statement_timeout = '1''; DROP'"
        );
    }
}
