use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::db::{KvStore, Versioned, merge_patch};

/// In-process store, used for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Versioned>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored paths under `prefix`.
    #[cfg(test)]
    pub async fn count_prefix(&self, prefix: &str) -> usize {
        self.entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }
}

fn write(entries: &mut HashMap<String, Versioned>, path: &str, value: Value) {
    let version = entries.get(path).map(|v| v.version + 1).unwrap_or(1);
    entries.insert(path.to_string(), Versioned { value, version });
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Versioned>> {
        Ok(self.entries.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        write(&mut *self.entries.write().await, path, value);
        Ok(())
    }

    async fn update(&self, path: &str, patch: Map<String, Value>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let current = entries.get(path).map(|v| v.value.clone());
        let merged = merge_patch(current, patch)?;
        write(&mut entries, path, merged);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        path: &str,
        expected: Option<i64>,
        value: Value,
    ) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let current = entries.get(path).map(|v| v.version);
        if current != expected {
            return Ok(false);
        }
        write(&mut entries, path, value);
        Ok(true)
    }
}
