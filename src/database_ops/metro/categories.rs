use serde_json::Value;
use tracing::{info, warn};

use super::provider::{MetroApi, MetroConfig, SearchQuery};

fn children(node: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match node.get("children") {
        Some(Value::Object(map)) => Box::new(map.values()),
        Some(Value::Array(items)) => Box::new(items.iter()),
        _ => Box::new(std::iter::empty()),
    }
}

fn walk(node: &Value, root_prefix: &str, out: &mut Vec<String>) {
    for child in children(node) {
        let Some(path) = child.get("urlCategoryPath").and_then(|v| v.as_str()) else {
            continue;
        };
        if !path.starts_with(root_prefix) {
            continue;
        }
        if !out.iter().any(|p| p == path) {
            out.push(path.to_string());
        }
        walk(child, root_prefix, out);
    }
}

/// Category paths under the food root, in tree order. Falls back to the root
/// path itself when the tree is missing or yields nothing.
pub fn collect_category_paths(response: &Value, cfg: &MetroConfig) -> Vec<String> {
    let root = response
        .get("categorytree")
        .and_then(|t| t.get("children"))
        .and_then(|c| c.get(&cfg.root_node));
    let mut out = Vec::new();
    match root {
        Some(node) => walk(node, &cfg.root_category, &mut out),
        None => warn!(root_node = %cfg.root_node, "category tree has no food root node"),
    }
    if out.is_empty() {
        out.push(cfg.root_category.clone());
    }
    out
}

/// Ask for one row under the root category and read the category tree off the
/// response. Request failures fall back to the root path.
pub async fn discover_categories<A: MetroApi + ?Sized>(api: &A, cfg: &MetroConfig) -> Vec<String> {
    let query = SearchQuery {
        category: cfg.root_category.clone(),
        page: 1,
        rows: 1,
    };
    let categories = match api.search(&query).await {
        Ok(body) => collect_category_paths(&body, cfg),
        Err(e) => {
            warn!(error = %e, "category tree request failed; using root category");
            vec![cfg.root_category.clone()]
        }
    };
    info!(count = categories.len(), "metro: categories discovered");
    categories
}
