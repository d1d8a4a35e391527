use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::provider::{MetroApi, MetroConfig, SearchQuery};
use crate::normalization::json::value_as_f64;

const VARIANT_SUFFIX_LEN: usize = 4;

/// Strip the 4-digit variant suffix: `BTY-X2945500032` -> `BTY-X294550`.
/// Identifiers of 4 characters or fewer, or without an all-digit tail, are
/// returned as they are.
pub fn variant_to_article_id(variant: &str) -> &str {
    if variant.chars().count() <= VARIANT_SUFFIX_LEN {
        return variant;
    }
    let split = variant.len() - VARIANT_SUFFIX_LEN;
    match variant.get(split..) {
        Some(tail) if tail.bytes().all(|b| b.is_ascii_digit()) => &variant[..split],
        _ => variant,
    }
}

/// Collapse variant ids to their articles, deduplicated and sorted.
pub fn canonical_article_ids<'a, I>(variant_ids: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    variant_ids
        .into_iter()
        .map(|v| variant_to_article_id(v).to_string())
        .collect()
}

fn page_ids(body: &Value) -> Option<Vec<String>> {
    let ids = body.get("resultIds")?.as_array()?;
    Some(
        ids.iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
    )
}

/// Declared page count; floats round up and numeric strings are accepted.
fn total_pages(body: &Value) -> u64 {
    body.get("totalPages")
        .and_then(value_as_f64)
        .map(|n| n.ceil().max(0.0) as u64)
        .unwrap_or(1)
}

/// Every variant id listed under `category`, page by page until the API runs
/// out, the declared page count is reached, or `max_pages` is hit.
pub async fn category_variant_ids<A: MetroApi + ?Sized>(
    api: &A,
    cfg: &MetroConfig,
    category: &str,
) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    let mut page: u32 = 1;
    loop {
        let query = SearchQuery {
            category: category.to_string(),
            page,
            rows: cfg.page_rows,
        };
        let body = match api.search(&query).await {
            Ok(body) => body,
            Err(e) => {
                warn!(category, page, error = %e, "metro: search page failed");
                break;
            }
        };
        let Some(found) = page_ids(&body) else {
            warn!(category, page, "metro: search response without resultIds");
            break;
        };
        if found.is_empty() {
            debug!(category, page, "metro: empty page");
            break;
        }
        let count = found.len();
        ids.extend(found);
        let declared = total_pages(&body);
        debug!(category, page, count, total_pages = declared, "metro: page fetched");

        if u64::from(page) >= declared || page >= cfg.max_pages {
            break;
        }
        page += 1;
    }
    info!(category, variants = ids.len(), pages = page, "metro: category paginated");
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeSearch {
        pages: HashMap<u32, Value>,
        requested: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl MetroApi for FakeSearch {
        async fn search(&self, query: &SearchQuery) -> Result<Value> {
            self.requested.lock().unwrap().push(query.page);
            self.pages
                .get(&query.page)
                .cloned()
                .ok_or_else(|| anyhow!("no page {}", query.page))
        }

        async fn articles(&self, _ids: &[String]) -> Result<Value> {
            Err(anyhow!("not used"))
        }
    }

    fn cfg() -> MetroConfig {
        MetroConfig {
            request_delay: Duration::ZERO,
            category_delay: Duration::ZERO,
            ..MetroConfig::default()
        }
    }

    #[test]
    fn strips_numeric_variant_suffix() {
        assert_eq!(variant_to_article_id("BTY-X2945500032"), "BTY-X294550");
        assert_eq!(variant_to_article_id("AB12"), "AB12");
        assert_eq!(variant_to_article_id("12345"), "1");
        assert_eq!(variant_to_article_id("BTY-X29455000A2"), "BTY-X29455000A2");
        assert_eq!(variant_to_article_id("хляб0001"), "хляб");
    }

    #[test]
    fn canonical_ids_are_deduplicated() {
        let variants: BTreeSet<String> = ["BTY-X1230001", "BTY-X1230002", "BTY-X9990001"]
            .into_iter()
            .map(String::from)
            .collect();
        let articles = canonical_article_ids(&variants);
        assert_eq!(
            articles.into_iter().collect::<Vec<_>>(),
            vec!["BTY-X123", "BTY-X999"]
        );
    }

    #[tokio::test]
    async fn stops_at_declared_total_pages() {
        let mut api = FakeSearch::default();
        for p in 1..=4u32 {
            api.pages.insert(
                p,
                json!({"resultIds": [format!("A{p}0001"), format!("B{p}0001")], "totalPages": 3}),
            );
        }
        let ids = category_variant_ids(&api, &cfg(), "c1").await;
        assert_eq!(ids.len(), 6);
        assert_eq!(*api.requested.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn float_and_string_total_pages_are_honoured() {
        for declared in [json!(3.0), json!("3"), json!(2.5)] {
            let mut api = FakeSearch::default();
            for p in 1..=4u32 {
                api.pages.insert(
                    p,
                    json!({"resultIds": [format!("A{p}0001"), format!("B{p}0001")], "totalPages": declared}),
                );
            }
            let ids = category_variant_ids(&api, &cfg(), "c1").await;
            assert_eq!(ids.len(), 6, "totalPages {declared}");
            assert_eq!(*api.requested.lock().unwrap(), vec![1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn missing_total_pages_means_one_page() {
        let mut api = FakeSearch::default();
        api.pages.insert(1, json!({"resultIds": ["A0001"]}));
        api.pages.insert(2, json!({"resultIds": ["B0001"]}));
        let ids = category_variant_ids(&api, &cfg(), "c1").await;
        assert_eq!(ids.len(), 1);
        assert_eq!(*api.requested.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn safety_bound_caps_pages() {
        let mut api = FakeSearch::default();
        for p in 1..=10u32 {
            api.pages
                .insert(p, json!({"resultIds": [format!("X{p}")], "totalPages": 500}));
        }
        let bounded = MetroConfig {
            max_pages: 4,
            ..cfg()
        };
        let ids = category_variant_ids(&api, &bounded, "c1").await;
        assert_eq!(ids.len(), 4);
        assert_eq!(api.requested.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn empty_or_malformed_pages_end_the_category() {
        let mut api = FakeSearch::default();
        api.pages
            .insert(1, json!({"resultIds": ["A1", "A2"], "totalPages": 9}));
        api.pages.insert(2, json!({"resultIds": [], "totalPages": 9}));
        assert_eq!(category_variant_ids(&api, &cfg(), "c1").await.len(), 2);

        let mut api = FakeSearch::default();
        api.pages.insert(1, json!({"error": "boom"}));
        assert!(category_variant_ids(&api, &cfg(), "c1").await.is_empty());

        let api = FakeSearch::default();
        assert!(category_variant_ids(&api, &cfg(), "c1").await.is_empty());
        assert_eq!(*api.requested.lock().unwrap(), vec![1]);
    }
}
