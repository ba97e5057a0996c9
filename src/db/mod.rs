pub mod memory;
pub mod models;
pub mod paths;
pub mod sqlite;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::{Config, StoreKind};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A stored value together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: Value,
    pub version: i64,
}

/// Hierarchical-path key-value store.
///
/// Every successful write bumps the version of the path, so a reader can
/// issue a conditional write that only lands if nobody else wrote in between.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Versioned>>;

    /// Unconditionally replace the value at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Shallow-merge `patch` into the object stored at `path`, creating it if absent.
    async fn update(&self, path: &str, patch: Map<String, Value>) -> Result<()>;

    /// Write `value` only if the current version equals `expected`.
    /// `None` means the path must not exist yet. Returns whether the write landed.
    async fn compare_and_set(&self, path: &str, expected: Option<i64>, value: Value)
    -> Result<bool>;
}

pub(crate) fn merge_patch(current: Option<Value>, patch: Map<String, Value>) -> Result<Value> {
    let mut object = match current {
        None => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => return Err(anyhow!("cannot patch non-object value: {}", other)),
    };
    object.extend(patch);
    Ok(Value::Object(object))
}

pub async fn init_store(config: &Config) -> Result<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match config.store {
        StoreKind::Sqlite => Arc::new(SqliteStore::connect(&config.database_url).await?),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_patch_keeps_untouched_fields() {
        let current = json!({"name": "Asha", "cashAmount": 100, "status": "Active"});
        let mut patch = Map::new();
        patch.insert("cashAmount".into(), json!(150));

        let merged = merge_patch(Some(current), patch).unwrap();
        assert_eq!(merged, json!({"name": "Asha", "cashAmount": 150, "status": "Active"}));
    }

    #[test]
    fn test_merge_patch_rejects_scalars() {
        let mut patch = Map::new();
        patch.insert("a".into(), json!(1));
        assert!(merge_patch(Some(json!("secret")), patch).is_err());
    }
}
