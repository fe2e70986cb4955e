//! End-to-end scenarios across the whole control plane: discovery feeds
//! the registry, the actuator authorizes and invokes, the queue and
//! lifecycle manager supervise agents and tasks.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use steward_actuator::{Actuator, CallerIdentity, Handler, HandlerOutput};
use steward_agent::{Agent, LifecycleManager, LifecycleStatus};
use steward_core::{events, Error, EventBus, HealthConfig, Result};
use steward_discovery::{MethodDescriptor, ServiceDescriptor, ServiceRegistry};
use steward_health::HealthMonitor;
use steward_queue::{Task, TaskQueue, TaskStatus};
use steward_rbac::{ActionAudit, AuditFilter, PolicyRule, RoleManager, SecurityPolicyManager};
use steward_storage::MemoryStore;

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn call(&self, params: serde_json::Map<String, Value>) -> Result<HandlerOutput> {
        Ok(HandlerOutput::new(Value::Object(params)))
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("steward_actuator=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn scenario_a_priority_ordering() {
    let queue = TaskQueue::new(Arc::new(MemoryStore::new()), EventBus::new());

    queue
        .enqueue(Task::new("index").with_id("t1").with_priority(1))
        .await
        .unwrap();
    queue
        .enqueue(Task::new("index").with_id("t2").with_priority(5))
        .await
        .unwrap();

    let next = queue.get_next(None, None).await.unwrap();
    assert_eq!(next.id, "t2");
}

#[tokio::test]
async fn scenario_b_timeout_sweep_fires_one_event() {
    let bus = EventBus::new();
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        bus.subscribe(events::TASK_TIMEOUT, move |event| {
            assert_eq!(event.payload["task_id"], json!("t1"));
            fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    let queue = TaskQueue::new(Arc::new(MemoryStore::new()), bus);

    queue
        .enqueue(Task::new("index").with_id("t1").with_timeout(1))
        .await
        .unwrap();
    queue.assign_task("t1", "a1").await.unwrap();
    queue.start_task("t1").await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let timed_out = queue.check_timeouts().await.unwrap();

    assert_eq!(timed_out, vec!["t1".to_string()]);
    assert_eq!(queue.get("t1").await.unwrap().status, TaskStatus::Timeout);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // A second sweep finds nothing: the task already left `running`.
    assert!(queue.check_timeouts().await.unwrap().is_empty());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_c_admin_inherits_editor_permission() {
    let roles = RoleManager::new();
    roles.create_role("editor").unwrap();
    roles.create_role("admin").unwrap();
    roles.register_permission("doc.write", "write documents");
    roles.assign_permission("editor", "doc.write").unwrap();
    roles.inherit("admin", "editor").unwrap();

    assert!(roles.has_permission("admin", "doc.write"));
}

#[tokio::test]
async fn scenario_d_default_deny_is_audited() {
    let policies = SecurityPolicyManager::new(ActionAudit::new(1000));

    assert!(!policies.enforce("admin", "read", &HashMap::new()));

    let entries = policies.audit().entries(&AuditFilter::default());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, "admin");
    assert_eq!(entries[0].action, "read");
    assert_eq!(entries[0].result, "denied");
}

#[tokio::test]
async fn registry_roundtrip_is_structural() {
    let registry = ServiceRegistry::new(Arc::new(MemoryStore::new()), 3600, EventBus::new());
    let descriptor = ServiceDescriptor::new("services::billing::InvoiceService")
        .with_method(MethodDescriptor::new("issue").with_return_type("Invoice"))
        .with_interface("Billing");

    registry.register(descriptor.clone()).await.unwrap();
    let found = registry
        .find("services::billing::InvoiceService")
        .await
        .unwrap();
    assert_eq!(found, descriptor);

    // Re-registration replaces, never merges.
    let replacement = ServiceDescriptor::new("services::billing::InvoiceService")
        .with_method(MethodDescriptor::new("void"));
    registry.register(replacement.clone()).await.unwrap();
    let found = registry
        .find("services::billing::InvoiceService")
        .await
        .unwrap();
    assert_eq!(found, replacement);
}

#[tokio::test]
async fn full_control_flow_from_catalog_to_health() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let bus = EventBus::new();

    let registry = ServiceRegistry::new(store.clone(), 3600, bus.clone());
    registry
        .register(ServiceDescriptor::new("EchoService").with_method(MethodDescriptor::new("echo")))
        .await
        .unwrap();

    let policies = SecurityPolicyManager::new(ActionAudit::new(1000));
    policies
        .add_policy(
            "operators",
            vec![PolicyRule::allow().for_role("operator").for_action("echo")],
        )
        .unwrap();

    let monitor = HealthMonitor::new(store.clone(), HealthConfig::default());
    let actuator = Actuator::new(registry, policies.clone(), monitor.clone());
    actuator
        .register_handler("EchoService", "echo", Arc::new(Echo))
        .await
        .unwrap();

    // Authorized invocation succeeds and is measured.
    let mut params = serde_json::Map::new();
    params.insert("msg".to_string(), json!("hi"));
    let value = actuator
        .invoke(
            &CallerIdentity::authenticated("operator"),
            "EchoService",
            "echo",
            params,
        )
        .await
        .unwrap();
    assert_eq!(value, json!({"msg": "hi"}));

    let metrics = monitor.metrics("EchoService", Some("echo")).await;
    assert_eq!(metrics.get("EchoService::echo").unwrap().successes, 1);

    // A different role is denied and never reaches the handler.
    let err = actuator
        .invoke(
            &CallerIdentity::authenticated("guest"),
            "EchoService",
            "echo",
            serde_json::Map::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    let metrics = monitor.metrics("EchoService", Some("echo")).await;
    assert_eq!(metrics.get("EchoService::echo").unwrap().calls, 1);

    // Both evaluations are in the audit log.
    assert_eq!(policies.audit().entries(&AuditFilter::default()).len(), 2);
}

#[tokio::test]
async fn agents_pull_tasks_and_report_back() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let bus = EventBus::new();
    let queue = TaskQueue::new(store.clone(), bus.clone());
    let manager = LifecycleManager::new(store, bus);

    let agent = Agent::new("indexer-1", "indexer")
        .with_id("a1")
        .with_capability("index");
    manager.initialize(&agent).await.unwrap();
    manager.activate("a1").await.unwrap();
    assert_eq!(
        manager.get("a1").await.unwrap().status,
        LifecycleStatus::Active
    );

    queue
        .enqueue(Task::new("index").with_id("t1").with_max_attempts(2))
        .await
        .unwrap();

    // First attempt fails; the task returns to pending for a retry.
    let next = queue
        .get_next(Some("a1"), Some(&["index".to_string()]))
        .await
        .unwrap();
    queue.assign_task(&next.id, "a1").await.unwrap();
    queue.start_task(&next.id).await.unwrap();
    queue.fail_task(&next.id, "transient").await.unwrap();
    manager
        .record_error("a1", "transient", None, None)
        .await
        .unwrap();
    assert_eq!(queue.get("t1").await.unwrap().status, TaskStatus::Pending);

    // Second attempt completes.
    let next = queue.get_next(Some("a1"), None).await.unwrap();
    queue.assign_task(&next.id, "a1").await.unwrap();
    queue.start_task(&next.id).await.unwrap();
    queue.complete_task(&next.id, None).await.unwrap();

    let stats = queue.stats().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.success_rate, Some(1.0));
    assert_eq!(manager.get("a1").await.unwrap().error_count, 1);

    manager.deactivate("a1").await.unwrap();
    manager.cleanup("a1").await.unwrap();
    assert!(manager.get("a1").await.is_none());
}
