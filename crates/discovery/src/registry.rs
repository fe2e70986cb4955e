use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use steward_core::{events, Error, EventBus, Result};
use steward_storage::{KvStore, KEY_REGISTRY};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::descriptor::ServiceDescriptor;

/// Durable catalog of service descriptors, keyed by fully-qualified name.
///
/// The in-memory map is authoritative; the durable store holds a mirror
/// with a TTL so a restarted process can hydrate a recent catalog instead
/// of rescanning.
#[derive(Clone)]
pub struct ServiceRegistry {
    descriptors: Arc<RwLock<HashMap<String, ServiceDescriptor>>>,
    store: Arc<dyn KvStore>,
    ttl_seconds: u64,
    bus: EventBus,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn KvStore>, ttl_seconds: u64, bus: EventBus) -> Self {
        Self {
            descriptors: Arc::new(RwLock::new(HashMap::new())),
            store,
            ttl_seconds,
            bus,
        }
    }

    /// Load the catalog mirror from the durable store if one is present.
    /// Call once right after construction.
    pub async fn hydrate(&self) -> Result<()> {
        let Some(value) = self.store.get(KEY_REGISTRY).await? else {
            return Ok(());
        };
        let loaded: HashMap<String, ServiceDescriptor> = serde_json::from_value(value)?;
        let mut descriptors = self.descriptors.write().await;
        info!(count = loaded.len(), "Service registry hydrated from store");
        *descriptors = loaded;
        Ok(())
    }

    /// Register a descriptor. Re-registering a name replaces the previous
    /// descriptor wholesale.
    pub async fn register(&self, descriptor: ServiceDescriptor) -> Result<()> {
        validate(&descriptor)?;
        let snapshot = {
            let mut descriptors = self.descriptors.write().await;
            debug!(service = %descriptor.name, methods = descriptor.methods.len(), "Service registered");
            descriptors.insert(descriptor.name.clone(), descriptor.clone());
            descriptors.clone()
        };
        self.bus.publish(
            events::SERVICE_REGISTERED,
            json!({ "service": descriptor.name }),
        );
        self.persist(snapshot).await;
        Ok(())
    }

    /// Register a batch, skipping invalid entries. Returns the number of
    /// descriptors accepted.
    pub async fn register_many(&self, descriptors: Vec<ServiceDescriptor>) -> usize {
        let mut accepted = 0;
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            match self.register(descriptor).await {
                Ok(()) => accepted += 1,
                Err(e) => warn!(service = %name, error = %e, "Descriptor rejected"),
            }
        }
        accepted
    }

    pub async fn unregister(&self, name: &str) -> Result<()> {
        let snapshot = {
            let mut descriptors = self.descriptors.write().await;
            if descriptors.remove(name).is_none() {
                return Err(Error::NotFound(format!("service '{}' is not registered", name)));
            }
            descriptors.clone()
        };
        info!(service = %name, "Service unregistered");
        self.persist(snapshot).await;
        Ok(())
    }

    pub async fn find(&self, name: &str) -> Option<ServiceDescriptor> {
        let descriptors = self.descriptors.read().await;
        descriptors.get(name).cloned()
    }

    /// All descriptors tagged with the given interface or mixin.
    pub async fn find_by_type(&self, tag: &str) -> Vec<ServiceDescriptor> {
        let descriptors = self.descriptors.read().await;
        let mut found: Vec<ServiceDescriptor> = descriptors
            .values()
            .filter(|d| d.has_tag(tag))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// All descriptors exposing a method with the given name.
    pub async fn find_by_method(&self, method: &str) -> Vec<ServiceDescriptor> {
        let descriptors = self.descriptors.read().await;
        let mut found: Vec<ServiceDescriptor> = descriptors
            .values()
            .filter(|d| d.has_method(method))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    pub async fn get_all(&self) -> Vec<ServiceDescriptor> {
        let descriptors = self.descriptors.read().await;
        let mut all: Vec<ServiceDescriptor> = descriptors.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn clear(&self) {
        let count = {
            let mut descriptors = self.descriptors.write().await;
            let count = descriptors.len();
            descriptors.clear();
            count
        };
        info!(count, "Service registry cleared");
        self.persist(HashMap::new()).await;
    }

    async fn persist(&self, snapshot: HashMap<String, ServiceDescriptor>) {
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(e) = self
                    .store
                    .set(KEY_REGISTRY, value, Some(self.ttl_seconds))
                    .await
                {
                    error!(error = %e, "Failed to persist service catalog");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize service catalog"),
        }
    }
}

fn validate(descriptor: &ServiceDescriptor) -> Result<()> {
    if descriptor.name.is_empty() {
        return Err(Error::Validation("descriptor name is empty".to_string()));
    }
    if descriptor.metadata.short_name.is_empty() {
        return Err(Error::Validation(format!(
            "descriptor '{}' has no short name",
            descriptor.name
        )));
    }
    if descriptor.methods.iter().any(|m| m.name.is_empty()) {
        return Err(Error::Validation(format!(
            "descriptor '{}' has an unnamed method",
            descriptor.name
        )));
    }
    Ok(())
}
