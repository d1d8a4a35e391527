//! Run-level composition: scrape, CSV hand-off, full-replace load and registry
//! reconciliation. Every step records its counts into a [`RunSummary`] so a
//! failed run can still report how far it got.
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::database_ops::csv_io::write_csv;
use crate::database_ops::loader::{
    effective_batch_size, replace_source_table, LoadSummary, DEFAULT_IMPORT_BATCH_SIZE,
};
use crate::database_ops::metro::{scrape_all, MetroApi, MetroConfig, ScrapeReport};
use crate::database_ops::registry::{reconcile_registry, ReconcileSummary, DEFAULT_STATEMENT_TIMEOUT};
use crate::database_ops::schema::{missing_tables, SourceTables};
use crate::record::{Coverage, FlatProductRecord};
use crate::util::db::Db;
use crate::util::env::{env_opt, env_parse};

/// Counts gathered over one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub scrape: Option<ScrapeReport>,
    pub coverage: Option<Coverage>,
    pub csv_path: Option<PathBuf>,
    pub imported: Option<usize>,
    pub load: Option<LoadSummary>,
    pub reconcile: Option<ReconcileSummary>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(s) = &self.scrape {
            parts.push(format!(
                "categories={} articles={} products={} rejected={}",
                s.categories, s.article_ids, s.products, s.rejected
            ));
        }
        if let Some(c) = &self.coverage {
            parts.push(format!(
                "with_nutrition={} with_ingredients={} with_image={}",
                c.with_nutrition, c.with_ingredients, c.with_image
            ));
        }
        if let Some(p) = &self.csv_path {
            parts.push(format!("csv={}", p.display()));
        }
        if let Some(n) = self.imported {
            parts.push(format!("csv_rows={n}"));
        }
        if let Some(l) = &self.load {
            parts.push(format!("loaded={} batches={}", l.rows, l.batches));
        }
        if let Some(r) = &self.reconcile {
            parts.push(format!(
                "tagged={} inserted={} registry_total={} registry_tagged={} multi_source={}",
                r.tagged, r.inserted, r.stats.total, r.stats.with_tag, r.stats.multi_source
            ));
        }
        if parts.is_empty() {
            f.write_str("nothing done")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

/// Destination settings for the load and reconcile steps.
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub tables: SourceTables,
    pub batch_size: usize,
    pub statement_timeout: String,
    pub skip_reconcile: bool,
}

impl LoadSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            tables: SourceTables::from_env()?,
            batch_size: effective_batch_size(env_parse(
                "IMPORT_BATCH_SIZE",
                DEFAULT_IMPORT_BATCH_SIZE,
            )),
            statement_timeout: env_opt("RECONCILE_STATEMENT_TIMEOUT")
                .unwrap_or_else(|| DEFAULT_STATEMENT_TIMEOUT.into()),
            skip_reconcile: false,
        })
    }
}

/// Scrape the catalogue and optionally write the CSV. An empty scrape is a
/// failed run.
pub async fn scrape_products<A: MetroApi + ?Sized>(
    api: &A,
    cfg: &MetroConfig,
    out: Option<&Path>,
    summary: &mut RunSummary,
) -> Result<Vec<FlatProductRecord>> {
    let outcome = scrape_all(api, cfg).await;
    summary.scrape = Some(outcome.report.clone());
    if outcome.records.is_empty() {
        bail!("scrape produced no products");
    }

    let coverage = Coverage::of(&outcome.records);
    info!(
        products = coverage.products,
        with_nutrition = coverage.with_nutrition,
        with_ingredients = coverage.with_ingredients,
        with_image = coverage.with_image,
        "metro: field coverage"
    );
    summary.coverage = Some(coverage);

    if let Some(path) = out {
        write_csv(path, &outcome.records)?;
        summary.csv_path = Some(path.to_path_buf());
    }
    Ok(outcome.records)
}

/// Refuse to load when the destination tables are not there.
pub async fn ensure_tables(db: &Db, tables: &SourceTables) -> Result<()> {
    let missing = missing_tables(db, &[tables.source.as_str(), tables.registry.as_str()]).await?;
    if !missing.is_empty() {
        bail!("missing tables {missing:?}; create them or rerun with AUTO_MIGRATE=1");
    }
    Ok(())
}

/// Replace the source table with `records`, then reconcile the registry
/// unless the settings skip it. Reconciliation never runs after a failed load.
pub async fn load_and_reconcile(
    db: &Db,
    settings: &LoadSettings,
    records: &[FlatProductRecord],
    summary: &mut RunSummary,
) -> Result<()> {
    ensure_tables(db, &settings.tables).await?;
    let load = replace_source_table(db, &settings.tables, records, settings.batch_size).await?;
    summary.load = Some(load);

    if settings.skip_reconcile {
        warn!("registry reconciliation skipped");
        return Ok(());
    }
    let reconcile = reconcile_registry(db, &settings.tables, &settings.statement_timeout).await?;
    summary.reconcile = Some(reconcile);
    Ok(())
}
