use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use steward_core::{events, Error, EventBus, Result};
use steward_storage::{KvStore, KEY_TASKS};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::task::{Task, TaskStatus};

/// Computed queue statistics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    /// Average of completed_at - started_at across completed tasks.
    pub avg_completion_ms: Option<f64>,
    /// completed / (completed + failed). None while the denominator is zero.
    pub success_rate: Option<f64>,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<String, Task>,
    /// Insertion order; filtered views preserve it.
    order: Vec<String>,
}

impl QueueState {
    fn in_order(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn snapshot(&self) -> Vec<Task> {
        self.in_order().cloned().collect()
    }
}

/// Priority task queue with a finite state machine per task.
///
/// The queue owns every task for its whole life: callers get clones and
/// route mutations back through `update` or the transition helpers. State
/// is mirrored to the durable store after every mutation.
#[derive(Clone)]
pub struct TaskQueue {
    state: Arc<Mutex<QueueState>>,
    store: Arc<dyn KvStore>,
    bus: EventBus,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn KvStore>, bus: EventBus) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            store,
            bus,
        }
    }

    /// Load the task snapshot from the durable store, replacing in-memory
    /// state. Call once right after construction.
    pub async fn hydrate(&self) -> Result<()> {
        let Some(value) = self.store.get(KEY_TASKS).await? else {
            return Ok(());
        };
        let tasks: Vec<Task> = serde_json::from_value(value)?;
        let mut state = self.state.lock().await;
        state.order = tasks.iter().map(|t| t.id.clone()).collect();
        state.tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        info!(count = state.order.len(), "Task queue hydrated from store");
        Ok(())
    }

    pub async fn enqueue(&self, task: Task) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().await;
            if state.tasks.contains_key(&task.id) {
                return Err(Error::Duplicate(format!("task '{}' already queued", task.id)));
            }
            debug!(task_id = %task.id, task_type = %task.task_type, priority = task.priority, "Task queued");
            let queued = json!({
                "task_id": task.id,
                "task_type": task.task_type,
                "priority": task.priority,
            });
            state.order.push(task.id.clone());
            state.tasks.insert(task.id.clone(), task);
            let snapshot = state.snapshot();
            drop(state);
            self.bus.publish(events::TASK_QUEUED, queued);
            snapshot
        };
        self.persist(snapshot).await;
        Ok(())
    }

    /// Remove and return a task. Returns None if absent.
    pub async fn dequeue(&self, id: &str) -> Option<Task> {
        let (removed, snapshot) = {
            let mut state = self.state.lock().await;
            let removed = state.tasks.remove(id);
            if removed.is_some() {
                state.order.retain(|t| t != id);
            }
            (removed, state.snapshot())
        };
        if removed.is_some() {
            self.persist(snapshot).await;
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        let state = self.state.lock().await;
        state.tasks.get(id).cloned()
    }

    /// Return the highest-priority pending task eligible under the given
    /// filters; ties resolve to the earliest-created task. With an agent
    /// filter, tasks already assigned to that agent are preferred and
    /// tasks assigned elsewhere are excluded.
    pub async fn get_next(
        &self,
        agent_id: Option<&str>,
        allowed_types: Option<&[String]>,
    ) -> Option<Task> {
        let state = self.state.lock().await;
        state
            .in_order()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| match (agent_id, t.assigned_agent_id.as_deref()) {
                (_, None) => true,
                (Some(agent), Some(assigned)) => agent == assigned,
                (None, Some(_)) => false,
            })
            .filter(|t| {
                allowed_types
                    .map(|types| types.iter().any(|ty| ty == &t.task_type))
                    .unwrap_or(true)
            })
            .max_by(|a, b| {
                let a_mine = agent_id.is_some() && a.assigned_agent_id.as_deref() == agent_id;
                let b_mine = agent_id.is_some() && b.assigned_agent_id.as_deref() == agent_id;
                a_mine
                    .cmp(&b_mine)
                    .then(a.priority.cmp(&b.priority))
                    // max_by keeps the later of equal elements, so invert
                    // created_at to make the earliest task win ties.
                    .then(b.created_at.cmp(&a.created_at))
            })
            .cloned()
    }

    /// Persist a task mutated elsewhere. Fails if the id is not tracked.
    pub async fn update(&self, task: Task) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().await;
            if !state.tasks.contains_key(&task.id) {
                return Err(Error::NotFound(format!("task '{}' is not tracked", task.id)));
            }
            state.tasks.insert(task.id.clone(), task);
            state.snapshot()
        };
        self.persist(snapshot).await;
        Ok(())
    }

    pub async fn get_by_status(&self, status: TaskStatus) -> Vec<Task> {
        let state = self.state.lock().await;
        state
            .in_order()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    pub async fn get_by_agent(&self, agent_id: &str) -> Vec<Task> {
        let state = self.state.lock().await;
        state
            .in_order()
            .filter(|t| t.assigned_agent_id.as_deref() == Some(agent_id))
            .cloned()
            .collect()
    }

    pub async fn get_by_type(&self, task_type: &str) -> Vec<Task> {
        let state = self.state.lock().await;
        state
            .in_order()
            .filter(|t| t.task_type == task_type)
            .cloned()
            .collect()
    }

    /// pending -> assigned, through the queue.
    pub async fn assign_task(&self, id: &str, agent_id: &str) -> Result<Task> {
        self.transition(id, |task| task.assign(agent_id)).await
    }

    /// assigned -> running, through the queue.
    pub async fn start_task(&self, id: &str) -> Result<Task> {
        self.transition(id, |task| task.start()).await
    }

    /// running -> completed; emits `task.completed`.
    pub async fn complete_task(
        &self,
        id: &str,
        result: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Task> {
        let task = self.transition(id, |task| task.complete(result)).await?;
        self.bus.publish(
            events::TASK_COMPLETED,
            json!({ "task_id": task.id, "task_type": task.task_type }),
        );
        Ok(task)
    }

    /// Record an execution failure; retries until attempts are exhausted,
    /// then emits `task.failed`.
    pub async fn fail_task(&self, id: &str, message: &str) -> Result<Task> {
        let task = self.transition(id, |task| task.fail(message)).await?;
        if task.status == TaskStatus::Failed {
            self.bus.publish(
                events::TASK_FAILED,
                json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "attempts": task.attempts,
                    "error": message,
                }),
            );
        }
        Ok(task)
    }

    /// Transition every running task whose elapsed time exceeds its
    /// timeout, and no others. Returns the ids of timed-out tasks.
    pub async fn check_timeouts(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let (timed_out, snapshot) = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .in_order()
                .filter(|t| t.is_timed_out(now))
                .map(|t| t.id.clone())
                .collect();
            let mut payloads = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(task) = state.tasks.get_mut(id) {
                    task.timeout()?;
                    payloads.push(json!({
                        "task_id": task.id,
                        "task_type": task.task_type,
                        "timeout_seconds": task.timeout_seconds,
                    }));
                }
            }
            let snapshot = state.snapshot();
            drop(state);
            for payload in payloads {
                self.bus.publish(events::TASK_TIMEOUT, payload);
            }
            (ids, snapshot)
        };

        if timed_out.is_empty() {
            debug!("Timeout sweep found no overdue tasks");
        } else {
            info!(count = timed_out.len(), "Tasks timed out");
            self.persist(snapshot).await;
        }
        Ok(timed_out)
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats {
            total: state.tasks.len(),
            ..Default::default()
        };

        let mut completion_ms = Vec::new();
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Assigned => stats.assigned += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => {
                    stats.completed += 1;
                    if let (Some(started), Some(completed)) = (task.started_at, task.completed_at) {
                        completion_ms.push((completed - started).num_milliseconds() as f64);
                    }
                }
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Timeout => stats.timeout += 1,
            }
        }

        if !completion_ms.is_empty() {
            stats.avg_completion_ms =
                Some(completion_ms.iter().sum::<f64>() / completion_ms.len() as f64);
        }
        let finished = stats.completed + stats.failed;
        if finished > 0 {
            stats.success_rate = Some(stats.completed as f64 / finished as f64);
        }
        stats
    }

    /// Remove all tasks. Logged, but no per-task events are emitted.
    pub async fn clear(&self) {
        let count = {
            let mut state = self.state.lock().await;
            let count = state.tasks.len();
            state.tasks.clear();
            state.order.clear();
            count
        };
        info!(count, "Task queue cleared");
        self.persist(Vec::new()).await;
    }

    async fn transition<F>(&self, id: &str, apply: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let (task, snapshot) = {
            let mut state = self.state.lock().await;
            let task = state
                .tasks
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("task '{}' is not tracked", id)))?;
            apply(task)?;
            debug!(task_id = %id, status = %task.status, attempts = task.attempts, "Task transition");
            (task.clone(), state.snapshot())
        };
        self.persist(snapshot).await;
        Ok(task)
    }

    async fn persist(&self, snapshot: Vec<Task>) {
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(e) = self.store.set(KEY_TASKS, value, None).await {
                    error!(error = %e, "Failed to persist task queue snapshot");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize task queue snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_storage::MemoryStore;

    fn queue() -> TaskQueue {
        TaskQueue::new(Arc::new(MemoryStore::new()), EventBus::new())
    }

    #[tokio::test]
    async fn test_enqueue_rejects_duplicate_id() {
        let queue = queue();
        queue
            .enqueue(Task::new("index").with_id("t1"))
            .await
            .unwrap();
        let err = queue
            .enqueue(Task::new("index").with_id("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_get_next_prefers_priority() {
        let queue = queue();
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
    async fn test_get_next_tie_breaks_on_created_at() {
        let queue = queue();
        let first = Task::new("index").with_id("first").with_priority(3);
        let mut second = Task::new("index").with_id("second").with_priority(3);
        second.created_at = first.created_at + chrono::Duration::milliseconds(5);

        // Enqueue in reverse order to prove ordering is by created_at.
        queue.enqueue(second).await.unwrap();
        queue.enqueue(first).await.unwrap();

        let next = queue.get_next(None, None).await.unwrap();
        assert_eq!(next.id, "first");
    }

    #[tokio::test]
    async fn test_get_next_filters_by_type() {
        let queue = queue();
        queue
            .enqueue(Task::new("index").with_id("t1").with_priority(9))
            .await
            .unwrap();
        queue
            .enqueue(Task::new("report").with_id("t2"))
            .await
            .unwrap();

        let types = vec!["report".to_string()];
        let next = queue.get_next(None, Some(&types)).await.unwrap();
        assert_eq!(next.id, "t2");

        let types = vec!["publish".to_string()];
        assert!(queue.get_next(None, Some(&types)).await.is_none());
    }

    #[tokio::test]
    async fn test_get_next_returns_none_when_nothing_pending() {
        let queue = queue();
        queue
            .enqueue(Task::new("index").with_id("t1"))
            .await
            .unwrap();
        queue.assign_task("t1", "a1").await.unwrap();
        assert!(queue.get_next(None, None).await.is_none());
    }

    #[tokio::test]
    async fn test_update_requires_tracked_task() {
        let queue = queue();
        let err = queue.update(Task::new("index")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_check_timeouts_transitions_exactly_overdue_tasks() {
        let queue = queue();
        for id in ["slow", "fast"] {
            queue
                .enqueue(Task::new("index").with_id(id).with_timeout(1))
                .await
                .unwrap();
            queue.assign_task(id, "a1").await.unwrap();
            queue.start_task(id).await.unwrap();
        }
        // Only "slow" is overdue.
        let mut slow = queue.get("slow").await.unwrap();
        slow.started_at = Some(Utc::now() - chrono::Duration::seconds(5));
        queue.update(slow).await.unwrap();

        let timed_out = queue.check_timeouts().await.unwrap();
        assert_eq!(timed_out, vec!["slow".to_string()]);
        assert_eq!(queue.get("slow").await.unwrap().status, TaskStatus::Timeout);
        assert_eq!(queue.get("fast").await.unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_timeout_emits_one_event_per_task() {
        let bus = EventBus::new();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let fired = fired.clone();
            bus.subscribe(events::TASK_TIMEOUT, move |_| {
                fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
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

        let mut task = queue.get("t1").await.unwrap();
        task.started_at = Some(Utc::now() - chrono::Duration::seconds(2));
        queue.update(task).await.unwrap();

        queue.check_timeouts().await.unwrap();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stats_and_success_rate() {
        let queue = queue();
        for id in ["a", "b", "c"] {
            queue
                .enqueue(Task::new("index").with_id(id).with_max_attempts(1))
                .await
                .unwrap();
        }

        queue.assign_task("a", "w1").await.unwrap();
        queue.start_task("a").await.unwrap();
        queue.complete_task("a", None).await.unwrap();

        queue.assign_task("b", "w1").await.unwrap();
        queue.start_task("b").await.unwrap();
        queue.fail_task("b", "boom").await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.success_rate, Some(0.5));
        assert!(stats.avg_completion_ms.is_some());
    }

    #[tokio::test]
    async fn test_filtered_views_preserve_insertion_order() {
        let queue = queue();
        for id in ["t1", "t2", "t3"] {
            queue
                .enqueue(Task::new("index").with_id(id))
                .await
                .unwrap();
        }
        let view = queue.get_by_type("index").await;
        let ids: Vec<&str> = view.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
        assert_eq!(queue.get_by_status(TaskStatus::Pending).await.len(), 3);
    }

    #[tokio::test]
    async fn test_hydrate_restores_snapshot() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let queue = TaskQueue::new(store.clone(), EventBus::new());
        queue
            .enqueue(Task::new("index").with_id("t1").with_priority(7))
            .await
            .unwrap();

        let rehydrated = TaskQueue::new(store, EventBus::new());
        rehydrated.hydrate().await.unwrap();
        let task = rehydrated.get("t1").await.unwrap();
        assert_eq!(task.priority, 7);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_clear_and_dequeue() {
        let queue = queue();
        queue
            .enqueue(Task::new("index").with_id("t1"))
            .await
            .unwrap();
        assert!(queue.dequeue("t1").await.is_some());
        assert!(queue.dequeue("t1").await.is_none());

        queue
            .enqueue(Task::new("index").with_id("t2"))
            .await
            .unwrap();
        queue.clear().await;
        assert_eq!(queue.stats().await.total, 0);
    }
}
