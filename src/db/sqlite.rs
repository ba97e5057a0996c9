use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

use crate::db::{KvStore, Versioned, merge_patch};

/// Attempts for `update` before giving up on a contended path.
const MAX_UPDATE_ATTEMPTS: usize = 16;

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, 5).await
    }

    pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, path: &str) -> Result<Option<Versioned>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT value, version FROM kv WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((raw, version)) => Ok(Some(Versioned {
                value: serde_json::from_str(&raw)?,
                version,
            })),
            None => Ok(None),
        }
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv (path, value, version) VALUES (?, ?, 1)
             ON CONFLICT(path) DO UPDATE SET value = excluded.value,
             version = kv.version + 1, updated_at = datetime('now')",
        )
        .bind(path)
        .bind(value.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, path: &str, patch: Map<String, Value>) -> Result<()> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let current = self.get(path).await?;
            let expected = current.as_ref().map(|v| v.version);
            let merged = merge_patch(current.map(|v| v.value), patch.clone())?;
            if self.compare_and_set(path, expected, merged).await? {
                return Ok(());
            }
        }
        Err(anyhow!("update of {} kept conflicting", path))
    }

    async fn compare_and_set(
        &self,
        path: &str,
        expected: Option<i64>,
        value: Value,
    ) -> Result<bool> {
        let result = match expected {
            None => {
                sqlx::query(
                    "INSERT INTO kv (path, value, version) VALUES (?, ?, 1)
                     ON CONFLICT(path) DO NOTHING",
                )
                .bind(path)
                .bind(value.to_string())
                .execute(&self.pool)
                .await?
            }
            Some(version) => {
                sqlx::query(
                    "UPDATE kv SET value = ?, version = version + 1, updated_at = datetime('now')
                     WHERE path = ? AND version = ?",
                )
                .bind(value.to_string())
                .bind(path)
                .bind(version)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteStore {
        // One connection so every query sees the same in-memory database
        SqliteStore::connect_with("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = store().await;
        assert!(store.get("/enrollments/1").await.unwrap().is_none());

        store
            .set("/enrollments/1", json!({"cardID": "c1", "name": "Asha"}))
            .await
            .unwrap();
        store
            .set("/enrollments/1", json!({"cardID": "c2", "name": "Asha"}))
            .await
            .unwrap();

        let got = store.get("/enrollments/1").await.unwrap().unwrap();
        assert_eq!(got.value["cardID"], "c2");
        assert_eq!(got.version, 2);
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let store = store().await;

        assert!(store.compare_and_set("/t/p1", None, json!({"a": 1})).await.unwrap());
        assert!(!store.compare_and_set("/t/p1", None, json!({"a": 2})).await.unwrap());
        assert!(!store.compare_and_set("/t/p1", Some(5), json!({"a": 3})).await.unwrap());
        assert!(store.compare_and_set("/t/p1", Some(1), json!({"a": 4})).await.unwrap());

        let got = store.get("/t/p1").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"a": 4}));
        assert_eq!(got.version, 2);
    }

    #[tokio::test]
    async fn test_update_creates_and_merges() {
        let store = store().await;

        let mut patch = Map::new();
        patch.insert("credited".into(), json!(false));
        store.update("/transactions/pay_1", patch).await.unwrap();

        let mut patch = Map::new();
        patch.insert("credited".into(), json!(true));
        patch.insert("amount".into(), json!(5000));
        store.update("/transactions/pay_1", patch).await.unwrap();

        let got = store.get("/transactions/pay_1").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"credited": true, "amount": 5000}));
    }
}
