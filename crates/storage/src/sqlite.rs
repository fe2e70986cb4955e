use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use steward_core::{Error, Result};
use tracing::debug;

use crate::kv::KvStore;

/// SQLite-backed key-value store with TTL expiry.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the store database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open store db: {}", e)))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path.to_path_buf()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to open in-memory db: {}", e)))?;
        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at_ms INTEGER
            );
            ",
        )
        .map_err(|e| Error::Storage(format!("Failed to init kv schema: {}", e)))?;
        debug!("KV store schema initialized");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now_ms = Utc::now().timestamp_millis();
        let conn = self.lock()?;

        // Purge this key if it expired; expired rows are absent by contract.
        conn.execute(
            "DELETE FROM kv WHERE key = ?1 AND expires_at_ms IS NOT NULL AND expires_at_ms <= ?2",
            params![key, now_ms],
        )
        .map_err(|e| Error::Storage(format!("Failed to purge expired key: {}", e)))?;

        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to read key '{}': {}", key, e)))?;

        match raw {
            Some(text) => {
                let value = serde_json::from_str(&text)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: Option<u64>) -> Result<()> {
        let expires_at_ms =
            ttl_seconds.map(|s| Utc::now().timestamp_millis() + (s as i64) * 1000);
        let text = serde_json::to_string(&value)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, expires_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at_ms = ?3",
            params![key, text, expires_at_ms],
        )
        .map_err(|e| Error::Storage(format!("Failed to write key '{}': {}", key, e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| Error::Storage(format!("Failed to delete key '{}': {}", key, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp_dir.path().join("kv.db")).unwrap();

        store
            .set("steward:tasks", json!({"t1": {"priority": 5}}), None)
            .await
            .unwrap();
        let value = store.get("steward:tasks").await.unwrap();
        assert_eq!(value, Some(json!({"t1": {"priority": 5}})));
    }

    #[tokio::test]
    async fn test_expired_key_is_absent() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("k", json!(1), Some(0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_noop() {
        let store = SqliteStore::in_memory().unwrap();
        store.delete("missing").await.unwrap();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}
