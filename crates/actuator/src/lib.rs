//! Entry point of the control plane: resolves a service descriptor,
//! checks policy, invokes the registered handler, and reports the outcome
//! to the health monitor.
//!
//! Dispatch is a typed table keyed by (service, action), validated at
//! registration time against the service registry instead of resolved by
//! string lookup at call time.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use steward_core::{Error, Result};
use steward_discovery::ServiceRegistry;
use steward_health::HealthMonitor;
use steward_rbac::SecurityPolicyManager;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Typed handler for one (service, action) pair.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, params: serde_json::Map<String, Value>) -> Result<HandlerOutput>;
}

/// Handler result envelope: the returned value plus an optional memory
/// sample forwarded to the health monitor.
#[derive(Debug, Clone)]
pub struct HandlerOutput {
    pub value: Value,
    pub memory_bytes: u64,
}

impl HandlerOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            memory_bytes: 0,
        }
    }

    pub fn with_memory_bytes(mut self, memory_bytes: u64) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Identity of the caller asking for an invocation. Authentication itself
/// is an external concern; only the resulting boolean is consumed here.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub role: String,
    pub authenticated: bool,
}

impl CallerIdentity {
    pub fn authenticated(role: &str) -> Self {
        Self {
            role: role.to_string(),
            authenticated: true,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            role: String::new(),
            authenticated: false,
        }
    }
}

/// Resolve -> authorize -> invoke -> report.
#[derive(Clone)]
pub struct Actuator {
    registry: ServiceRegistry,
    policies: SecurityPolicyManager,
    monitor: HealthMonitor,
    handlers: Arc<RwLock<HashMap<(String, String), Arc<dyn Handler>>>>,
}

impl Actuator {
    pub fn new(
        registry: ServiceRegistry,
        policies: SecurityPolicyManager,
        monitor: HealthMonitor,
    ) -> Self {
        Self {
            registry,
            policies,
            monitor,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handler for (service, action). Validated here rather
    /// than at call time: the service must be in the registry and the
    /// action must be one of its descriptor's methods.
    pub async fn register_handler(
        &self,
        service: &str,
        action: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        let descriptor = self
            .registry
            .find(service)
            .await
            .ok_or_else(|| Error::NotFound(format!("service '{}' is not registered", service)))?;
        if !descriptor.has_method(action) {
            return Err(Error::Validation(format!(
                "service '{}' has no method '{}'",
                service, action
            )));
        }
        let mut handlers = self.handlers.write().await;
        handlers.insert((service.to_string(), action.to_string()), handler);
        info!(service = %service, action = %action, "Handler registered");
        Ok(())
    }

    /// Invoke `action` on `service` on behalf of `caller`.
    ///
    /// The outcome (success or failure, latency, memory sample) is always
    /// reported to the health monitor; threshold breaches there are log
    /// warnings and never affect the returned result.
    pub async fn invoke(
        &self,
        caller: &CallerIdentity,
        service: &str,
        action: &str,
        params: serde_json::Map<String, Value>,
    ) -> Result<Value> {
        if !caller.authenticated {
            return Err(Error::PermissionDenied(
                "caller is not authenticated".to_string(),
            ));
        }

        if self.registry.find(service).await.is_none() {
            return Err(Error::NotFound(format!(
                "service '{}' is not registered",
                service
            )));
        }

        let mut context = HashMap::new();
        context.insert("service".to_string(), Value::String(service.to_string()));
        context.insert("action".to_string(), Value::String(action.to_string()));
        if !self.policies.enforce(&caller.role, action, &context) {
            return Err(Error::PermissionDenied(format!(
                "role '{}' may not perform '{}' on '{}'",
                caller.role, action, service
            )));
        }

        let handler = {
            let handlers = self.handlers.read().await;
            handlers
                .get(&(service.to_string(), action.to_string()))
                .cloned()
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "no handler registered for '{}::{}'",
                        service, action
                    ))
                })?
        };

        let started = Utc::now();
        let outcome = handler.call(params).await;
        let ended = Utc::now();

        let (success, memory_bytes) = match &outcome {
            Ok(output) => (true, output.memory_bytes),
            Err(_) => (false, 0),
        };
        self.monitor
            .record_call(service, action, started, ended, success, memory_bytes)
            .await;
        debug!(service = %service, action = %action, success, "Invocation finished");

        outcome.map(|output| output.value)
    }
}
