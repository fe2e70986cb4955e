use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use steward_core::{new_id, Error, Result};

/// Status of a supervised task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is queued and eligible for assignment.
    Pending,
    /// Task has been handed to an agent but not started.
    Assigned,
    /// Task is currently executing.
    Running,
    /// Task finished successfully. Terminal.
    Completed,
    /// Task exhausted its attempts. Terminal.
    Failed,
    /// Task exceeded its timeout while running. Terminal.
    Timeout,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// One recorded execution failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    pub message: String,
    pub timestamp_ms: i64,
}

/// A unit of work with a finite-state lifecycle, priority, and
/// retry/timeout policy.
///
/// Tasks are owned by the queue for their whole life. All state changes go
/// through the transition methods below; the queue never mutates fields
/// directly and callers get clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Higher priority is served first.
    pub priority: i64,
    pub status: TaskStatus,
    pub assigned_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: serde_json::Map<String, serde_json::Value>,
    pub errors: Vec<TaskError>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub timeout_seconds: u64,
}

impl Task {
    pub fn new(task_type: &str) -> Self {
        Self {
            id: new_id(),
            task_type: task_type.to_string(),
            parameters: serde_json::Map::new(),
            priority: 0,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: serde_json::Map::new(),
            errors: Vec::new(),
            attempts: 0,
            max_attempts: 3,
            timeout_seconds: 3600,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameters(
        mut self,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// pending -> assigned
    pub fn assign(&mut self, agent_id: &str) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "task {} cannot be assigned from '{}'",
                self.id, self.status
            )));
        }
        self.status = TaskStatus::Assigned;
        self.assigned_agent_id = Some(agent_id.to_string());
        Ok(())
    }

    /// assigned -> running. The only place `attempts` increments.
    pub fn start(&mut self) -> Result<()> {
        if self.status != TaskStatus::Assigned {
            return Err(Error::InvalidTransition(format!(
                "task {} must be assigned before starting (status '{}')",
                self.id, self.status
            )));
        }
        self.status = TaskStatus::Running;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running -> completed
    pub fn complete(
        &mut self,
        result: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(Error::InvalidTransition(format!(
                "task {} must be running to complete (status '{}')",
                self.id, self.status
            )));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.assigned_agent_id = None;
        if let Some(result) = result {
            self.result = result;
        }
        Ok(())
    }

    /// running -> pending (retry) or failed (attempts exhausted).
    pub fn fail(&mut self, message: &str) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(Error::InvalidTransition(format!(
                "task {} must be running to fail (status '{}')",
                self.id, self.status
            )));
        }
        self.errors.push(TaskError {
            message: message.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
        });
        self.assigned_agent_id = None;
        if self.attempts < self.max_attempts {
            self.status = TaskStatus::Pending;
            self.started_at = None;
        } else {
            self.status = TaskStatus::Failed;
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// running -> timeout. Driven by the queue's timeout sweep.
    pub fn timeout(&mut self) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(Error::InvalidTransition(format!(
                "task {} must be running to time out (status '{}')",
                self.id, self.status
            )));
        }
        self.status = TaskStatus::Timeout;
        self.completed_at = Some(Utc::now());
        self.assigned_agent_id = None;
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::Running | TaskStatus::Failed
        ) && self.attempts < self.max_attempts
    }

    /// Whether a running task has exceeded its timeout as of `now`.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        match self.started_at {
            Some(started) => {
                (now - started).num_seconds() > self.timeout_seconds as i64
            }
            None => false,
        }
    }
}
