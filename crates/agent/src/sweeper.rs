use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use steward_core::HealthState;
use steward_queue::TaskQueue;
use tracing::{debug, error, info};

use crate::lifecycle::LifecycleManager;

/// Periodic driver for the work the core never does implicitly: the task
/// timeout sweep and heartbeat staleness checks. All decisions live in the
/// queue and the lifecycle manager; this is just the polling loop.
pub struct HeartbeatSweeper {
    manager: LifecycleManager,
    queue: TaskQueue,
    interval: Duration,
    stale_after: Duration,
}

impl HeartbeatSweeper {
    pub fn new(manager: LifecycleManager, queue: TaskQueue) -> Self {
        Self {
            manager,
            queue,
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Run one sweep: expire overdue tasks and degrade agents whose last
    /// heartbeat is older than the staleness window.
    pub async fn sweep(&self) {
        if let Err(e) = self.queue.check_timeouts().await {
            error!(error = %e, "Timeout sweep failed");
        }

        let cutoff_ms = Utc::now().timestamp_millis() - self.stale_after.as_millis() as i64;
        for record in self.manager.get_all().await {
            if record.last_heartbeat_ms < cutoff_ms && record.health == HealthState::Healthy {
                debug!(agent_id = %record.agent.id, "Agent heartbeat is stale");
                if let Err(e) = self
                    .manager
                    .update_health(&record.agent.id, HealthState::Degraded)
                    .await
                {
                    error!(agent_id = %record.agent.id, error = %e, "Failed to degrade stale agent");
                }
            }
        }
    }

    pub async fn run_loop(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "HeartbeatSweeper started");

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.recv() => {
                    info!("HeartbeatSweeper shutting down");
                    break;
                }
            }
        }
    }
}
