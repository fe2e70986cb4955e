use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// An immutable record of a single policy-evaluation outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub role: String,
    pub action: String,
    pub details: serde_json::Map<String, serde_json::Value>,
    pub result: String,
    pub error: Option<String>,
    pub timestamp_ms: i64,
}

/// Filter for reading back audit entries. All fields optional; empty
/// filter returns everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub role: Option<String>,
    pub action: Option<String>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.role.as_deref().map(|r| r == entry.role).unwrap_or(true)
            && self
                .action
                .as_deref()
                .map(|a| a == entry.action)
                .unwrap_or(true)
            && self.since_ms.map(|t| entry.timestamp_ms >= t).unwrap_or(true)
            && self.until_ms.map(|t| entry.timestamp_ms <= t).unwrap_or(true)
    }
}

/// Append-only, size-bounded audit log. Oldest entries are discarded first
/// once the bound is reached.
#[derive(Clone)]
pub struct ActionAudit {
    inner: Arc<Mutex<AuditState>>,
}

struct AuditState {
    entries: VecDeque<AuditEntry>,
    max_size: usize,
}

impl Default for ActionAudit {
    /// Tiny default; callers are expected to size the log explicitly.
    fn default() -> Self {
        Self::new(5)
    }
}

impl ActionAudit {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditState {
                entries: VecDeque::new(),
                max_size,
            })),
        }
    }

    pub fn log_action(
        &self,
        role: &str,
        action: &str,
        details: serde_json::Map<String, serde_json::Value>,
        result: &str,
        error: Option<&str>,
    ) {
        let mut state = self.lock();
        state.entries.push_back(AuditEntry {
            role: role.to_string(),
            action: action.to_string(),
            details,
            result: result.to_string(),
            error: error.map(|e| e.to_string()),
            timestamp_ms: Utc::now().timestamp_millis(),
        });
        while state.entries.len() > state.max_size {
            state.entries.pop_front();
        }
    }

    pub fn entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let state = self.lock();
        state
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Shrink or grow the bound; trims oldest entries immediately when
    /// shrinking.
    pub fn set_max_size(&self, max_size: usize) {
        let mut state = self.lock();
        state.max_size = max_size;
        while state.entries.len() > state.max_size {
            state.entries.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuditState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
