use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use steward_core::{events, Error, EventBus, HealthState, ResourceUsage, Result};
use steward_storage::{KvStore, KEY_AGENTS};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::agent::Agent;

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Initialized,
    Active,
    Inactive,
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleStatus::Initialized => write!(f, "initialized"),
            LifecycleStatus::Active => write!(f, "active"),
            LifecycleStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// Last error recorded for an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentError {
    pub message: String,
    pub location: Option<String>,
    pub stack: Option<String>,
}

/// Per-agent lifecycle state tracked by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub agent: Agent,
    pub status: LifecycleStatus,
    pub initialized_at_ms: i64,
    pub activated_at_ms: Option<i64>,
    pub deactivated_at_ms: Option<i64>,
    pub last_heartbeat_ms: i64,
    pub error_count: u64,
    pub last_error: Option<AgentError>,
    pub resource_usage: ResourceUsage,
    pub health: HealthState,
}

/// Tracks every agent's lifecycle state. Sole mutator of lifecycle fields;
/// every change persists the full map back to the durable store and logs
/// one line per transition.
#[derive(Clone)]
pub struct LifecycleManager {
    records: Arc<Mutex<HashMap<String, LifecycleRecord>>>,
    store: Arc<dyn KvStore>,
    bus: EventBus,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn KvStore>, bus: EventBus) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            store,
            bus,
        }
    }

    /// Load lifecycle records from the durable store, replacing in-memory
    /// state. Call once right after construction.
    pub async fn hydrate(&self) -> Result<()> {
        let Some(value) = self.store.get(KEY_AGENTS).await? else {
            return Ok(());
        };
        let loaded: HashMap<String, LifecycleRecord> = serde_json::from_value(value)?;
        let mut records = self.records.lock().await;
        info!(count = loaded.len(), "Agent lifecycle state hydrated from store");
        *records = loaded;
        Ok(())
    }

    pub async fn initialize(&self, agent: &Agent) -> Result<()> {
        let snapshot = {
            let mut records = self.records.lock().await;
            if records.contains_key(&agent.id) {
                return Err(Error::Duplicate(format!(
                    "agent '{}' already initialized",
                    agent.id
                )));
            }
            let now_ms = Utc::now().timestamp_millis();
            records.insert(
                agent.id.clone(),
                LifecycleRecord {
                    agent: agent.clone(),
                    status: LifecycleStatus::Initialized,
                    initialized_at_ms: now_ms,
                    activated_at_ms: None,
                    deactivated_at_ms: None,
                    last_heartbeat_ms: now_ms,
                    error_count: 0,
                    last_error: None,
                    resource_usage: ResourceUsage::default(),
                    health: HealthState::Healthy,
                },
            );
            records.clone()
        };
        info!(agent_id = %agent.id, name = %agent.name, "Agent initialized");
        self.emit_state_change(&agent.id, LifecycleStatus::Initialized);
        self.persist(snapshot).await;
        Ok(())
    }

    pub async fn activate(&self, agent_id: &str) -> Result<()> {
        self.set_status(agent_id, LifecycleStatus::Active).await
    }

    pub async fn deactivate(&self, agent_id: &str) -> Result<()> {
        self.set_status(agent_id, LifecycleStatus::Inactive).await
    }

    /// Remove the lifecycle record entirely.
    pub async fn cleanup(&self, agent_id: &str) -> Result<()> {
        let snapshot = {
            let mut records = self.records.lock().await;
            if records.remove(agent_id).is_none() {
                return Err(Error::NotFound(format!("agent '{}' is not tracked", agent_id)));
            }
            records.clone()
        };
        info!(agent_id = %agent_id, "Agent lifecycle record removed");
        self.persist(snapshot).await;
        Ok(())
    }

    pub async fn record_error(
        &self,
        agent_id: &str,
        message: &str,
        location: Option<&str>,
        stack: Option<&str>,
    ) -> Result<()> {
        let (count, snapshot) = {
            let mut records = self.records.lock().await;
            let record = Self::get_mut(&mut records, agent_id)?;
            record.error_count += 1;
            record.last_error = Some(AgentError {
                message: message.to_string(),
                location: location.map(|s| s.to_string()),
                stack: stack.map(|s| s.to_string()),
            });
            (record.error_count, records.clone())
        };
        warn!(agent_id = %agent_id, error_count = count, error = %message, "Agent error recorded");
        self.persist(snapshot).await;
        Ok(())
    }

    pub async fn update_resource_usage(
        &self,
        agent_id: &str,
        memory_bytes: u64,
        cpu_percent: f64,
    ) -> Result<()> {
        let snapshot = {
            let mut records = self.records.lock().await;
            let record = Self::get_mut(&mut records, agent_id)?;
            record.resource_usage = ResourceUsage {
                memory_bytes,
                cpu_percent,
            };
            records.clone()
        };
        self.persist(snapshot).await;
        Ok(())
    }

    pub async fn update_heartbeat(&self, agent_id: &str) -> Result<()> {
        let snapshot = {
            let mut records = self.records.lock().await;
            let record = Self::get_mut(&mut records, agent_id)?;
            record.last_heartbeat_ms = Utc::now().timestamp_millis();
            records.clone()
        };
        self.persist(snapshot).await;
        Ok(())
    }

    pub async fn update_health(&self, agent_id: &str, health: HealthState) -> Result<()> {
        let snapshot = {
            let mut records = self.records.lock().await;
            let record = Self::get_mut(&mut records, agent_id)?;
            record.health = health;
            records.clone()
        };
        info!(agent_id = %agent_id, health = %health, "Agent health updated");
        self.persist(snapshot).await;
        Ok(())
    }

    pub async fn get(&self, agent_id: &str) -> Option<LifecycleRecord> {
        let records = self.records.lock().await;
        records.get(agent_id).cloned()
    }

    pub async fn get_all(&self) -> Vec<LifecycleRecord> {
        let records = self.records.lock().await;
        records.values().cloned().collect()
    }

    async fn set_status(&self, agent_id: &str, status: LifecycleStatus) -> Result<()> {
        let snapshot = {
            let mut records = self.records.lock().await;
            let record = Self::get_mut(&mut records, agent_id)?;
            let now_ms = Utc::now().timestamp_millis();
            record.status = status;
            match status {
                LifecycleStatus::Active => record.activated_at_ms = Some(now_ms),
                LifecycleStatus::Inactive => record.deactivated_at_ms = Some(now_ms),
                LifecycleStatus::Initialized => {}
            }
            records.clone()
        };
        info!(agent_id = %agent_id, status = %status, "Agent state transition");
        self.emit_state_change(agent_id, status);
        self.persist(snapshot).await;
        Ok(())
    }

    fn get_mut<'a>(
        records: &'a mut HashMap<String, LifecycleRecord>,
        agent_id: &str,
    ) -> Result<&'a mut LifecycleRecord> {
        records
            .get_mut(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent '{}' is not tracked", agent_id)))
    }

    fn emit_state_change(&self, agent_id: &str, status: LifecycleStatus) {
        self.bus.publish(
            events::AGENT_STATE_CHANGED,
            json!({ "agent_id": agent_id, "status": status.to_string() }),
        );
    }

    async fn persist(&self, snapshot: HashMap<String, LifecycleRecord>) {
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(e) = self.store.set(KEY_AGENTS, value, None).await {
                    error!(error = %e, "Failed to persist agent lifecycle map");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize agent lifecycle map"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_storage::MemoryStore;

    fn manager() -> LifecycleManager {
        LifecycleManager::new(Arc::new(MemoryStore::new()), EventBus::new())
    }

    #[tokio::test]
    async fn test_initialize_once() {
        let manager = manager();
        let agent = Agent::new("worker", "indexer").with_id("a1");
        manager.initialize(&agent).await.unwrap();

        let record = manager.get("a1").await.unwrap();
        assert_eq!(record.status, LifecycleStatus::Initialized);
        assert_eq!(record.error_count, 0);
        assert_eq!(record.health, HealthState::Healthy);

        let err = manager.initialize(&agent).await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_activate_requires_initialization() {
        let manager = manager();
        let err = manager.activate("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let agent = Agent::new("worker", "indexer").with_id("a1");
        manager.initialize(&agent).await.unwrap();
        manager.activate("a1").await.unwrap();

        let record = manager.get("a1").await.unwrap();
        assert_eq!(record.status, LifecycleStatus::Active);
        assert!(record.activated_at_ms.is_some());

        manager.deactivate("a1").await.unwrap();
        assert_eq!(
            manager.get("a1").await.unwrap().status,
            LifecycleStatus::Inactive
        );
    }

    #[tokio::test]
    async fn test_cleanup_removes_record() {
        let manager = manager();
        let agent = Agent::new("worker", "indexer").with_id("a1");
        manager.initialize(&agent).await.unwrap();
        manager.cleanup("a1").await.unwrap();
        assert!(manager.get("a1").await.is_none());
        assert!(matches!(
            manager.cleanup("a1").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_record_error_and_usage() {
        let manager = manager();
        let agent = Agent::new("worker", "indexer").with_id("a1");
        manager.initialize(&agent).await.unwrap();

        manager
            .record_error("a1", "oom", Some("indexer.rs:42"), None)
            .await
            .unwrap();
        manager.update_resource_usage("a1", 64 << 20, 12.5).await.unwrap();
        manager.update_health("a1", HealthState::Degraded).await.unwrap();

        let record = manager.get("a1").await.unwrap();
        assert_eq!(record.error_count, 1);
        assert_eq!(record.last_error.as_ref().unwrap().message, "oom");
        assert_eq!(record.resource_usage.memory_bytes, 64 << 20);
        assert_eq!(record.health, HealthState::Degraded);
    }

    #[tokio::test]
    async fn test_persists_and_hydrates() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let manager = LifecycleManager::new(store.clone(), EventBus::new());
        let agent = Agent::new("worker", "indexer").with_id("a1");
        manager.initialize(&agent).await.unwrap();
        manager.activate("a1").await.unwrap();

        let restored = LifecycleManager::new(store, EventBus::new());
        restored.hydrate().await.unwrap();
        let record = restored.get("a1").await.unwrap();
        assert_eq!(record.status, LifecycleStatus::Active);
        assert_eq!(record.agent.name, "worker");
    }

    #[tokio::test]
    async fn test_state_change_events() {
        let bus = EventBus::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            bus.subscribe(events::AGENT_STATE_CHANGED, move |event| {
                let status = event.payload["status"].as_str().unwrap_or("").to_string();
                seen.lock().unwrap().push(status);
                Ok(())
            });
        }
        let manager = LifecycleManager::new(Arc::new(MemoryStore::new()), bus);
        let agent = Agent::new("worker", "indexer").with_id("a1");
        manager.initialize(&agent).await.unwrap();
        manager.activate("a1").await.unwrap();
        manager.deactivate("a1").await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["initialized", "active", "inactive"]
        );
    }
}
