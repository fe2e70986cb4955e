use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use steward_core::Result;
use tokio::sync::RwLock;

/// Store key for the task queue snapshot.
pub const KEY_TASKS: &str = "steward:tasks";
/// Store key for the per-agent lifecycle map.
pub const KEY_AGENTS: &str = "steward:agents";
/// Store key for the service registry catalog.
pub const KEY_REGISTRY: &str = "steward:registry";
/// Store key for the health-metric map.
pub const KEY_HEALTH: &str = "steward:health";

/// Durable key-value port. Subsystems write one composite value per key
/// and treat the store purely as a durability/restart mechanism; it is not
/// a concurrency primitive.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value, ttl_seconds: Option<u64>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory store with lazy TTL expiry. Used in tests and as a default
/// when durability is not required.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, (Value, Option<Instant>)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => Ok(None),
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: Option<u64>) -> Result<()> {
        let deadline = ttl_seconds.map(|s| Instant::now() + Duration::from_secs(s));
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}
