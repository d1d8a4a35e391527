use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use grocery_ingest::database_ops::csv_io::read_csv;
use grocery_ingest::database_ops::loader::effective_batch_size;
use grocery_ingest::database_ops::metro::details::fetch_details_batch;
use grocery_ingest::database_ops::metro::{MetroClient, MetroConfig};
use grocery_ingest::database_ops::registry::{reconcile_registry, registry_stats};
use grocery_ingest::normalization::extract_batch;
use grocery_ingest::orchestrator::{
    ensure_tables, load_and_reconcile, scrape_products, LoadSettings, RunSummary,
};
use grocery_ingest::tracing::{init_tracing, DEFAULT_FILTER};
use grocery_ingest::util::env;
use grocery_ingest::Db;

#[derive(Parser, Debug)]
#[command(name = "metro", version, about = "METRO Bulgaria product scraper and loader")]
struct Cli {
    /// Debug logging for this crate (RUST_LOG still wins when set)
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the scraper settings taken from the environment.
#[derive(Args, Debug, Default)]
struct ScrapeArgs {
    /// Page bound per category
    #[arg(long)]
    max_pages: Option<u32>,
    /// Search rows per page
    #[arg(long)]
    rows: Option<u32>,
    /// Delay before every request, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Article ids per detail request
    #[arg(long)]
    batch_size: Option<usize>,
}

impl ScrapeArgs {
    fn config(&self) -> MetroConfig {
        let mut cfg = MetroConfig::from_env();
        if let Some(n) = self.max_pages {
            cfg.max_pages = n.max(1);
        }
        if let Some(n) = self.rows {
            cfg.page_rows = n.max(1);
        }
        if let Some(ms) = self.delay_ms {
            cfg.request_delay = Duration::from_millis(ms);
        }
        if let Some(n) = self.batch_size {
            cfg.batch_size = n.max(1);
        }
        cfg
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Scrape the food catalogue and write it to CSV
    Scrape {
        /// Output CSV path
        #[arg(long, default_value = "metro_products.csv")]
        out: PathBuf,
        #[command(flatten)]
        scrape: ScrapeArgs,
    },
    /// Load a product CSV into the source table and reconcile the registry
    Import {
        /// Input CSV path
        #[arg(long)]
        csv: PathBuf,
        /// Load only; leave the registry untouched
        #[arg(long, default_value_t = false)]
        skip_reconcile: bool,
        /// Rows per insert batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Scrape, load and reconcile in one run
    Sync {
        /// Also write the scraped products to this CSV
        #[arg(long)]
        out: Option<PathBuf>,
        /// Load only; leave the registry untouched
        #[arg(long, default_value_t = false)]
        skip_reconcile: bool,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        #[command(flatten)]
        scrape: ScrapeArgs,
    },
    /// Reconcile the registry against the current source table
    Reconcile {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Fetch one detail batch for explicit article ids and print the records
    Probe {
        /// Comma-separated article ids (e.g. BTY-X294550)
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
    },
    /// Connect and print registry statistics
    DbCheck {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

async fn connect(db_url: Option<String>) -> Result<Db> {
    let url = match db_url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
        Some(u) => u,
        None => env::db_url_prefer_session().context("resolve database URL")?,
    };
    env::preflight_check(
        "metro",
        &[],
        &[
            "DATABASE_URL",
            "METRO_SOURCE_TABLE",
            "METRO_REGISTRY_TABLE",
            "METRO_SOURCE_TAG",
            "AUTO_MIGRATE",
        ],
    )?;
    Db::connect(&url, env::env_parse("DB_MAX_CONNS", 5u32)).await
}

async fn run(command: Commands, summary: &mut RunSummary) -> Result<()> {
    match command {
        Commands::Scrape { out, scrape } => {
            let client = MetroClient::new(scrape.config())?;
            scrape_products(&client, client.config(), Some(&out), summary).await?;
        }
        Commands::Import {
            csv,
            skip_reconcile,
            batch_size,
            db_url,
        } => {
            let records = read_csv(&csv)?;
            summary.imported = Some(records.len());
            if records.is_empty() {
                bail!("{} holds no importable rows", csv.display());
            }
            let mut settings = LoadSettings::from_env()?;
            settings.skip_reconcile = skip_reconcile;
            if let Some(n) = batch_size {
                settings.batch_size = effective_batch_size(n);
            }
            let db = connect(db_url).await?;
            load_and_reconcile(&db, &settings, &records, summary).await?;
        }
        Commands::Sync {
            out,
            skip_reconcile,
            db_url,
            scrape,
        } => {
            let mut settings = LoadSettings::from_env()?;
            settings.skip_reconcile = skip_reconcile;
            let db = connect(db_url).await?;
            ensure_tables(&db, &settings.tables).await?;

            let client = MetroClient::new(scrape.config())?;
            let records =
                scrape_products(&client, client.config(), out.as_deref(), summary).await?;
            load_and_reconcile(&db, &settings, &records, summary).await?;
        }
        Commands::Reconcile { db_url } => {
            let settings = LoadSettings::from_env()?;
            let db = connect(db_url).await?;
            ensure_tables(&db, &settings.tables).await?;
            let reconcile =
                reconcile_registry(&db, &settings.tables, &settings.statement_timeout).await?;
            summary.reconcile = Some(reconcile);
        }
        Commands::Probe { ids } => {
            let client = MetroClient::new(MetroConfig::from_env())?;
            let result = fetch_details_batch(&client, &ids).await;
            if result.is_empty() {
                bail!("no article details returned for {ids:?}");
            }
            let extracted = extract_batch(result.iter());
            info!(
                requested = ids.len(),
                returned = result.len(),
                products = extracted.records.len(),
                rejected = extracted.rejected,
                "probe: batch extracted"
            );
            println!("{}", serde_json::to_string_pretty(&extracted.records)?);
        }
        Commands::DbCheck { db_url } => {
            let settings = LoadSettings::from_env()?;
            let db = connect(db_url).await?;
            ensure_tables(&db, &settings.tables).await?;
            let stats = registry_stats(&db, &settings.tables).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env::init_env();
    let cli = Cli::parse();
    if let Err(e) = init_tracing(DEFAULT_FILTER, cli.verbose) {
        eprintln!("{e}");
    }

    let mut summary = RunSummary::default();
    match run(cli.command, &mut summary).await {
        Ok(()) => {
            info!(summary = %summary, "metro: run succeeded");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, summary = %summary, "metro: run failed");
            ExitCode::FAILURE
        }
    }
}
