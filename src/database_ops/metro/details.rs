use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::provider::MetroApi;

/// Fetch one batch of article details. Returns the `result` map keyed by
/// article id; a failed request or a body without `result` yields an empty
/// map and the batch is skipped.
pub async fn fetch_details_batch<A: MetroApi + ?Sized>(
    api: &A,
    article_ids: &[String],
) -> Map<String, Value> {
    if article_ids.is_empty() {
        return Map::new();
    }
    let body = match api.articles(article_ids).await {
        Ok(body) => body,
        Err(e) => {
            warn!(ids = article_ids.len(), first = %article_ids[0], error = %e, "metro: detail batch failed");
            return Map::new();
        }
    };
    match body {
        Value::Object(mut obj) => match obj.remove("result") {
            Some(Value::Object(result)) => {
                debug!(requested = article_ids.len(), returned = result.len(), "metro: detail batch fetched");
                result
            }
            _ => {
                warn!(ids = article_ids.len(), first = %article_ids[0], "metro: detail response without result map");
                Map::new()
            }
        },
        _ => {
            warn!(ids = article_ids.len(), "metro: detail response is not an object");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::metro::provider::SearchQuery;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedDetails(Option<Value>);

    #[async_trait]
    impl MetroApi for FixedDetails {
        async fn search(&self, _query: &SearchQuery) -> Result<Value> {
            Err(anyhow!("not used"))
        }

        async fn articles(&self, _ids: &[String]) -> Result<Value> {
            self.0.clone().ok_or_else(|| anyhow!("connection reset"))
        }
    }

    fn ids() -> Vec<String> {
        vec!["BTY-X1".into(), "BTY-X2".into()]
    }

    #[tokio::test]
    async fn returns_result_map_in_payload_order() {
        let api = FixedDetails(Some(json!({
            "result": { "BTY-X2": {"variants": {}}, "BTY-X1": {"variants": {}} }
        })));
        let result = fetch_details_batch(&api, &ids()).await;
        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["BTY-X2", "BTY-X1"]);
    }

    #[tokio::test]
    async fn failures_yield_empty_batches() {
        assert!(fetch_details_batch(&FixedDetails(None), &ids()).await.is_empty());
        let no_result = FixedDetails(Some(json!({"errors": ["boom"]})));
        assert!(fetch_details_batch(&no_result, &ids()).await.is_empty());
        let not_object = FixedDetails(Some(json!([1, 2])));
        assert!(fetch_details_batch(&not_object, &ids()).await.is_empty());
    }
}
