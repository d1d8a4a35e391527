use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::util::env::{env_opt, env_parse};

const SEARCH_PATH: &str = "/searchdiscover/articlesearch/search";
const ARTICLES_PATH: &str = "/evaluate.article.v1/betty-articles";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Scraper settings. Defaults target the METRO Bulgaria food catalogue.
#[derive(Debug, Clone)]
pub struct MetroConfig {
    pub base_url: String,
    pub store_id: String,
    pub locale: String,
    pub country: String,
    /// Category path prefix every discovered category must start with.
    pub root_category: String,
    /// Key of the root node under `categorytree.children`.
    pub root_node: String,
    /// Observed before every request, search and detail alike.
    pub request_delay: Duration,
    /// Extra pause after each category has been paginated.
    pub category_delay: Duration,
    pub timeout: Duration,
    pub page_rows: u32,
    /// Absolute page bound per category, regardless of declared totals.
    pub max_pages: u32,
    pub batch_size: usize,
    pub user_agent: String,
}

impl Default for MetroConfig {
    fn default() -> Self {
        Self {
            base_url: "https://shop.metro.bg".into(),
            store_id: "00010".into(),
            locale: "bg-BG".into(),
            country: "BG".into(),
            root_category: "хранителни-стоки".into(),
            root_node: "Food_1622788118100".into(),
            request_delay: Duration::from_millis(1500),
            category_delay: Duration::from_millis(2000),
            timeout: Duration::from_secs(30),
            page_rows: 100,
            max_pages: 100,
            batch_size: 20,
            user_agent: DEFAULT_USER_AGENT.into(),
        }
    }
}

impl MetroConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: env_opt("METRO_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(d.base_url),
            store_id: env_opt("METRO_STORE_ID").unwrap_or(d.store_id),
            locale: env_opt("METRO_LOCALE").unwrap_or(d.locale),
            country: env_opt("METRO_COUNTRY").unwrap_or(d.country),
            root_category: env_opt("METRO_ROOT_CATEGORY").unwrap_or(d.root_category),
            root_node: env_opt("METRO_ROOT_NODE").unwrap_or(d.root_node),
            request_delay: Duration::from_millis(env_parse("METRO_DELAY_MS", 1500u64)),
            category_delay: Duration::from_millis(env_parse("METRO_CATEGORY_DELAY_MS", 2000u64)),
            timeout: Duration::from_secs(env_parse("METRO_TIMEOUT_SECS", 30u64)),
            page_rows: env_parse("METRO_PAGE_ROWS", 100u32).max(1),
            max_pages: env_parse("METRO_MAX_PAGES", 100u32).max(1),
            batch_size: env_parse("METRO_BATCH_SIZE", 20usize).max(1),
            user_agent: env_opt("METRO_USER_AGENT").unwrap_or(d.user_agent),
        }
    }
}

/// One page of a category search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub category: String,
    pub page: u32,
    pub rows: u32,
}

/// The two upstream calls the scraper makes. Implementations return the raw
/// JSON body; shape checks belong to the callers.
#[async_trait]
pub trait MetroApi: Send + Sync {
    /// Category search: `categorytree`, `resultIds`, `totalPages`.
    async fn search(&self, query: &SearchQuery) -> Result<Value>;

    /// Article details for a batch of article ids: `result{id → article}`.
    async fn articles(&self, article_ids: &[String]) -> Result<Value>;
}

/// Fixed pause before each request.
#[derive(Debug, Clone)]
pub struct RequestPacer {
    delay: Duration,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
    }
}

/// HTTP client for shop.metro.bg, constructed once and passed by reference.
pub struct MetroClient {
    http: Client,
    cfg: MetroConfig,
    pacer: RequestPacer,
}

impl MetroClient {
    pub fn new(cfg: MetroConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("bg-BG,bg;q=0.9,en;q=0.8"),
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{}/", cfg.base_url)).context("referer header")?,
        );
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .timeout(cfg.timeout)
            .build()
            .context("build metro http client")?;
        info!(
            base_url = %cfg.base_url,
            delay_ms = cfg.request_delay.as_millis() as u64,
            timeout_secs = cfg.timeout.as_secs(),
            "metro: client configured"
        );
        Ok(Self {
            http,
            pacer: RequestPacer::new(cfg.request_delay),
            cfg,
        })
    }

    pub fn config(&self) -> &MetroConfig {
        &self.cfg
    }

    fn cache_buster() -> String {
        Utc::now().timestamp_millis().to_string()
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.cfg.base_url, path);
        self.pacer.wait().await;
        debug!(url = %url, params = params.len(), "metro: requesting");

        let resp = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .with_context(|| format!("request {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 500);
            return Err(anyhow!("metro request failed: {status} url={url} body={body}"));
        }
        resp.json::<Value>()
            .await
            .with_context(|| format!("decode JSON from {url}"))
    }
}

#[async_trait]
impl MetroApi for MetroClient {
    async fn search(&self, query: &SearchQuery) -> Result<Value> {
        let params = search_params(&self.cfg, query, Self::cache_buster());
        self.get_json(SEARCH_PATH, &params).await
    }

    async fn articles(&self, article_ids: &[String]) -> Result<Value> {
        let params = articles_params(&self.cfg, article_ids, Self::cache_buster());
        self.get_json(ARTICLES_PATH, &params).await
    }
}

/// Query string for one search page.
fn search_params(
    cfg: &MetroConfig,
    query: &SearchQuery,
    t: String,
) -> Vec<(&'static str, String)> {
    vec![
        ("storeId", cfg.store_id.clone()),
        ("language", cfg.locale.clone()),
        ("country", cfg.country.clone()),
        ("query", "*".to_string()),
        ("rows", query.rows.to_string()),
        ("page", query.page.to_string()),
        ("filter", format!("category:{}", query.category)),
        ("facets", "true".to_string()),
        ("categories", "true".to_string()),
        ("__t", t),
    ]
}

/// Query string for one detail batch; every id is its own `ids` pair.
fn articles_params(
    cfg: &MetroConfig,
    article_ids: &[String],
    t: String,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("country", cfg.country.clone()),
        ("locale", cfg.locale.clone()),
        ("storeIds", cfg.store_id.clone()),
        ("details", "true".to_string()),
        ("__t", t),
    ];
    params.extend(article_ids.iter().map(|id| ("ids", id.clone())));
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn client_builds_from_defaults() {
        let client = MetroClient::new(MetroConfig::default()).unwrap();
        assert_eq!(client.config().batch_size, 20);
        assert_eq!(client.config().max_pages, 100);
        assert!(client.config().base_url.starts_with("https://"));
    }

    #[tokio::test]
    async fn pacer_sleeps_before_each_request() {
        let delay = Duration::from_millis(20);
        let pacer = RequestPacer::new(delay);
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= delay * 2);
    }

    fn param<'a>(params: &'a [(&str, String)], key: &str) -> Vec<&'a str> {
        params
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn search_query_carries_category_filter_and_paging() {
        let cfg = MetroConfig::default();
        let query = SearchQuery {
            category: "food/dairy/cheese".into(),
            page: 3,
            rows: 48,
        };
        let params = search_params(&cfg, &query, "1700000000000".into());
        assert_eq!(param(&params, "filter"), vec!["category:food/dairy/cheese"]);
        assert_eq!(param(&params, "page"), vec!["3"]);
        assert_eq!(param(&params, "rows"), vec!["48"]);
        assert_eq!(param(&params, "query"), vec!["*"]);
        assert_eq!(param(&params, "storeId"), vec![cfg.store_id.as_str()]);
        assert_eq!(param(&params, "language"), vec![cfg.locale.as_str()]);
        assert_eq!(param(&params, "__t"), vec!["1700000000000"]);
    }

    #[test]
    fn article_ids_repeat_in_order() {
        let cfg = MetroConfig::default();
        let ids = vec!["BTY-X2".to_string(), "BTY-X1".to_string(), "BTY-X3".to_string()];
        let params = articles_params(&cfg, &ids, "42".into());
        assert_eq!(param(&params, "ids"), vec!["BTY-X2", "BTY-X1", "BTY-X3"]);
        assert_eq!(param(&params, "details"), vec!["true"]);
        assert_eq!(param(&params, "storeIds"), vec![cfg.store_id.as_str()]);
        assert_eq!(param(&params, "locale"), vec![cfg.locale.as_str()]);
        assert_eq!(param(&params, "__t"), vec!["42"]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = truncate_for_log("аааа".to_string(), 3);
        assert_eq!(s, "а…");
    }
}
