use anyhow::{bail, Result};

use crate::util::db::Db;
use crate::util::env::env_opt;

pub const DEFAULT_SOURCE_TABLE: &str = "public.metro_source";
pub const DEFAULT_REGISTRY_TABLE: &str = "public.food_item_sources";
pub const DEFAULT_SOURCE_TAG: &str = "metro";

/// Table names and the registry tag for this source. Names are interpolated
/// into SQL, so they are validated as plain (optionally schema-qualified)
/// identifiers on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTables {
    pub source: String,
    pub registry: String,
    pub tag: String,
}

impl SourceTables {
    pub fn new(source: &str, registry: &str, tag: &str) -> Result<Self> {
        for name in [source, registry] {
            if !is_plain_identifier(name) {
                bail!("invalid table name {name:?}");
            }
        }
        if tag.trim().is_empty() {
            bail!("source tag must not be empty");
        }
        Ok(Self {
            source: source.to_string(),
            registry: registry.to_string(),
            tag: tag.trim().to_string(),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(
            &env_opt("METRO_SOURCE_TABLE").unwrap_or_else(|| DEFAULT_SOURCE_TABLE.into()),
            &env_opt("METRO_REGISTRY_TABLE").unwrap_or_else(|| DEFAULT_REGISTRY_TABLE.into()),
            &env_opt("METRO_SOURCE_TAG").unwrap_or_else(|| DEFAULT_SOURCE_TAG.into()),
        )
    }

    /// Unqualified part of the source table name (`metro_source`).
    pub fn source_basename(&self) -> &str {
        self.source.rsplit('.').next().unwrap_or(&self.source)
    }
}

impl Default for SourceTables {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE_TABLE.into(),
            registry: DEFAULT_REGISTRY_TABLE.into(),
            tag: DEFAULT_SOURCE_TAG.into(),
        }
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|p| {
            let mut chars = p.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Tables from `names` that do not resolve via the current search_path.
pub async fn missing_tables<'a>(db: &Db, names: &[&'a str]) -> Result<Vec<&'a str>> {
    let mut missing = Vec::new();
    for &table in names {
        let visible: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .persistent(false)
            .bind(table)
            .fetch_one(&db.pool)
            .await?;
        if !visible {
            missing.push(table);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_qualified_names() {
        let t = SourceTables::new("public.metro_source", "food_item_sources", "metro").unwrap();
        assert_eq!(t.source_basename(), "metro_source");
        assert_eq!(SourceTables::default(), t_with_defaults());
    }

    fn t_with_defaults() -> SourceTables {
        SourceTables::new(DEFAULT_SOURCE_TABLE, DEFAULT_REGISTRY_TABLE, DEFAULT_SOURCE_TAG).unwrap()
    }

    #[test]
    fn rejects_injection_and_empty_tag() {
        assert!(SourceTables::new("metro_source; DROP TABLE x", "r", "metro").is_err());
        assert!(SourceTables::new("a.b.c", "r", "metro").is_err());
        assert!(SourceTables::new("1abc", "r", "metro").is_err());
        assert!(SourceTables::new("s", "r", "  ").is_err());
    }
}
