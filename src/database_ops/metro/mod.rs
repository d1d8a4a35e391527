//! METRO Bulgaria catalogue scraper.
//!
//! Discovery fans out over the food category tree because a single search is
//! capped at `max_pages * rows` results. Variant ids from every category are
//! unioned, collapsed to article ids and fetched in detail batches.
pub mod categories;
pub mod details;
pub mod paginator;
pub mod provider;

use std::collections::BTreeSet;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, instrument};

use crate::normalization::extract_batch;
use crate::record::FlatProductRecord;

pub use provider::{MetroApi, MetroClient, MetroConfig, SearchQuery};

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeReport {
    pub categories: usize,
    pub variant_ids: usize,
    pub article_ids: usize,
    pub batches: usize,
    pub empty_batches: usize,
    pub products: usize,
    pub rejected: usize,
}

#[derive(Debug, Default)]
pub struct ScrapeOutcome {
    pub records: Vec<FlatProductRecord>,
    pub report: ScrapeReport,
}

/// Result of the discovery phase.
#[derive(Debug, Default)]
pub struct Discovery {
    pub article_ids: BTreeSet<String>,
    pub categories: usize,
    pub variant_ids: usize,
}

/// Walk the category tree and paginate every category, then collapse the
/// union of variant ids to article ids.
#[instrument(skip(api, cfg))]
pub async fn discover_article_ids<A: MetroApi + ?Sized>(api: &A, cfg: &MetroConfig) -> Discovery {
    let categories = categories::discover_categories(api, cfg).await;
    let mut variants: BTreeSet<String> = BTreeSet::new();
    for (idx, category) in categories.iter().enumerate() {
        info!(
            category = %category,
            n = idx + 1,
            of = categories.len(),
            "metro: paginating category"
        );
        let found = paginator::category_variant_ids(api, cfg, category).await;
        variants.extend(found);
        if idx + 1 < categories.len() && !cfg.category_delay.is_zero() {
            sleep(cfg.category_delay).await;
        }
    }
    let articles = paginator::canonical_article_ids(&variants);
    info!(
        variants = variants.len(),
        articles = articles.len(),
        "metro: article ids collapsed"
    );
    Discovery {
        article_ids: articles,
        categories: categories.len(),
        variant_ids: variants.len(),
    }
}

/// Full scrape: discovery, detail batches, extraction. Individual page, batch
/// and record failures are logged and skipped.
#[instrument(skip(api, cfg))]
pub async fn scrape_all<A: MetroApi + ?Sized>(api: &A, cfg: &MetroConfig) -> ScrapeOutcome {
    let Discovery {
        article_ids,
        categories,
        variant_ids,
    } = discover_article_ids(api, cfg).await;
    let mut outcome = ScrapeOutcome {
        report: ScrapeReport {
            categories,
            variant_ids,
            article_ids: article_ids.len(),
            ..ScrapeReport::default()
        },
        ..ScrapeOutcome::default()
    };
    if article_ids.is_empty() {
        error!("metro: no article ids discovered");
        return outcome;
    }

    let ids: Vec<String> = article_ids.into_iter().collect();
    let total_batches = ids.len().div_ceil(cfg.batch_size.max(1));
    let mut next_progress = PROGRESS_EVERY;
    for (idx, batch) in ids.chunks(cfg.batch_size.max(1)).enumerate() {
        let result = details::fetch_details_batch(api, batch).await;
        outcome.report.batches += 1;
        if result.is_empty() {
            outcome.report.empty_batches += 1;
            continue;
        }
        let extracted = extract_batch(result.iter());
        outcome.report.rejected += extracted.rejected;
        outcome.records.extend(extracted.records);

        if outcome.records.len() >= next_progress {
            info!(
                products = outcome.records.len(),
                batch = idx + 1,
                batches = total_batches,
                "metro: scrape progress"
            );
            next_progress = (outcome.records.len() / PROGRESS_EVERY + 1) * PROGRESS_EVERY;
        }
    }
    outcome.report.products = outcome.records.len();
    info!(
        products = outcome.report.products,
        rejected = outcome.report.rejected,
        empty_batches = outcome.report.empty_batches,
        "metro: scrape finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Three categories, the last one failing; details for a fixed set of articles.
    struct FakeShop {
        detail_calls: Mutex<Vec<Vec<String>>>,
    }

    fn article(ean: &str, name: &str) -> Value {
        json!({"variants": {"0001": {"bundles": {"b": {
            "eanNumber": [{"number": ean}],
            "description": name
        }}}}})
    }

    #[async_trait]
    impl MetroApi for FakeShop {
        async fn search(&self, query: &SearchQuery) -> Result<Value> {
            match query.category.as_str() {
                "хранителни-стоки" => Ok(json!({
                    "categorytree": {"children": {"Food_1622788118100": {"children": {
                        "a": {"urlCategoryPath": "хранителни-стоки/а"},
                        "b": {"urlCategoryPath": "хранителни-стоки/б"},
                        "c": {"urlCategoryPath": "хранителни-стоки/в"}
                    }}}}
                })),
                "хранителни-стоки/а" => Ok(json!({
                    "resultIds": ["BTY-X10001", "BTY-X10002", "BTY-X20001"],
                    "totalPages": 1
                })),
                "хранителни-стоки/б" => Ok(json!({
                    "resultIds": ["BTY-X20002", "BTY-X30001"],
                    "totalPages": 1
                })),
                _ => Err(anyhow!("503 Service Unavailable")),
            }
        }

        async fn articles(&self, ids: &[String]) -> Result<Value> {
            self.detail_calls.lock().unwrap().push(ids.to_vec());
            let mut result = serde_json::Map::new();
            for id in ids {
                let payload = match id.as_str() {
                    "BTY-X1" => article("3800000000011", "Хляб"),
                    "BTY-X2" => article("3800000000028", "Мляко"),
                    _ => json!({"variants": {}}),
                };
                result.insert(id.clone(), payload);
            }
            Ok(json!({ "result": result }))
        }
    }

    #[tokio::test]
    async fn scrapes_across_categories_and_skips_failures() {
        let api = FakeShop {
            detail_calls: Mutex::new(Vec::new()),
        };
        let cfg = MetroConfig {
            request_delay: Duration::ZERO,
            category_delay: Duration::ZERO,
            batch_size: 2,
            ..MetroConfig::default()
        };
        let outcome = scrape_all(&api, &cfg).await;

        assert_eq!(outcome.report.categories, 3);
        assert_eq!(outcome.report.variant_ids, 5);
        assert_eq!(outcome.report.article_ids, 3);
        assert_eq!(outcome.report.batches, 2);
        assert_eq!(outcome.report.rejected, 1);

        let codes: Vec<&str> = outcome.records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["3800000000011", "3800000000028"]);

        let calls = api.detail_calls.lock().unwrap();
        assert_eq!(calls[0], vec!["BTY-X1", "BTY-X2"]);
        assert_eq!(calls[1], vec!["BTY-X3"]);
    }
}
