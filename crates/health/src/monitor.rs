use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use steward_core::{HealthConfig, Result};
use steward_storage::{KvStore, KEY_HEALTH};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Accumulated call metrics for one (service, method) pair. Monotonic;
/// reset only by an explicit clear.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetricRecord {
    pub calls: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
    pub total_memory_bytes: u64,
    pub max_memory_bytes: u64,
    pub last_updated_ms: i64,
}

impl MetricRecord {
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.errors as f64 / self.calls as f64
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.calls as f64
    }

    pub fn avg_memory_bytes(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.total_memory_bytes as f64 / self.calls as f64
    }
}

fn metric_key(service: &str, method: &str) -> String {
    format!("{}::{}", service, method)
}

/// Records per-(service, method) call outcomes and logs threshold
/// breaches. Breaches are observability signals only; they never abort the
/// call that triggered them, and remediation is a caller responsibility.
#[derive(Clone)]
pub struct HealthMonitor {
    metrics: Arc<Mutex<HashMap<String, MetricRecord>>>,
    config: Arc<Mutex<HealthConfig>>,
    store: Arc<dyn KvStore>,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn KvStore>, config: HealthConfig) -> Self {
        Self {
            metrics: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(Mutex::new(config)),
            store,
        }
    }

    /// Load the metric mirror from the durable store if one is present.
    /// Call once right after construction.
    pub async fn hydrate(&self) -> Result<()> {
        let Some(value) = self.store.get(KEY_HEALTH).await? else {
            return Ok(());
        };
        let loaded: HashMap<String, MetricRecord> = serde_json::from_value(value)?;
        let mut metrics = self.metrics.lock().await;
        info!(count = loaded.len(), "Health metrics hydrated from store");
        *metrics = loaded;
        Ok(())
    }

    /// Record one call outcome, then check thresholds.
    pub async fn record_call(
        &self,
        service: &str,
        method: &str,
        started: DateTime<Utc>,
        ended: DateTime<Utc>,
        success: bool,
        memory_bytes: u64,
    ) {
        let latency_ms = (ended - started).num_milliseconds().max(0) as u64;
        let config = self.config.lock().await.clone();

        let (record, snapshot) = {
            let mut metrics = self.metrics.lock().await;
            let record = metrics.entry(metric_key(service, method)).or_default();
            record.calls += 1;
            if success {
                record.successes += 1;
            } else {
                record.errors += 1;
            }
            record.total_latency_ms += latency_ms;
            record.max_latency_ms = record.max_latency_ms.max(latency_ms);
            record.total_memory_bytes += memory_bytes;
            record.max_memory_bytes = record.max_memory_bytes.max(memory_bytes);
            record.last_updated_ms = Utc::now().timestamp_millis();
            (record.clone(), metrics.clone())
        };

        if record.calls >= config.min_calls {
            check_thresholds(service, method, &record, &config);
        }
        self.persist(snapshot, config.store_ttl_seconds).await;
    }

    /// Metrics for one service; with `method` given, just that pair.
    pub async fn metrics(&self, service: &str, method: Option<&str>) -> HashMap<String, MetricRecord> {
        let metrics = self.metrics.lock().await;
        match method {
            Some(method) => {
                let key = metric_key(service, method);
                metrics
                    .get(&key)
                    .map(|r| HashMap::from([(key, r.clone())]))
                    .unwrap_or_default()
            }
            None => {
                let prefix = format!("{}::", service);
                metrics
                    .iter()
                    .filter(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
        }
    }

    pub async fn all_metrics(&self) -> HashMap<String, MetricRecord> {
        self.metrics.lock().await.clone()
    }

    pub async fn clear(&self) {
        let ttl = {
            let mut metrics = self.metrics.lock().await;
            metrics.clear();
            self.config.lock().await.store_ttl_seconds
        };
        info!("Health metrics cleared");
        self.persist(HashMap::new(), ttl).await;
    }

    pub async fn thresholds(&self) -> HealthConfig {
        self.config.lock().await.clone()
    }

    pub async fn set_error_rate_threshold(&self, threshold: f64) {
        self.config.lock().await.error_rate_threshold = threshold;
    }

    pub async fn set_latency_threshold_ms(&self, threshold: u64) {
        self.config.lock().await.latency_threshold_ms = threshold;
    }

    pub async fn set_memory_threshold_bytes(&self, threshold: u64) {
        self.config.lock().await.memory_threshold_bytes = threshold;
    }

    async fn persist(&self, snapshot: HashMap<String, MetricRecord>, ttl_seconds: u64) {
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(e) = self.store.set(KEY_HEALTH, value, Some(ttl_seconds)).await {
                    error!(error = %e, "Failed to persist health metrics");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize health metrics"),
        }
    }
}

fn check_thresholds(service: &str, method: &str, record: &MetricRecord, config: &HealthConfig) {
    if record.error_rate() > config.error_rate_threshold {
        warn!(
            service = %service,
            method = %method,
            error_rate = record.error_rate(),
            threshold = config.error_rate_threshold,
            "Error rate threshold breached"
        );
    }
    if record.avg_latency_ms() > config.latency_threshold_ms as f64 {
        warn!(
            service = %service,
            method = %method,
            avg_latency_ms = record.avg_latency_ms(),
            threshold_ms = config.latency_threshold_ms,
            "Latency threshold breached"
        );
    }
    if record.avg_memory_bytes() > config.memory_threshold_bytes as f64
        || record.max_memory_bytes > config.memory_threshold_bytes
    {
        warn!(
            service = %service,
            method = %method,
            avg_memory_bytes = record.avg_memory_bytes(),
            max_memory_bytes = record.max_memory_bytes,
            threshold_bytes = config.memory_threshold_bytes,
            "Memory threshold breached"
        );
    }
}
