use std::{
    collections::HashSet,
    time::{SystemTime, UNIX_EPOCH},
};

use helix_workers::WorkerId;
use serde::{Deserialize, Serialize};

/// Stable task identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Business priority; influences retry aggressiveness and alerting, not
/// queue order (spec glossary: "Criticality").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Low,
    Normal,
    Critical,
}

/// Lifecycle state. Valid transitions:
/// `Pending -> Running -> {Completed, Failed, Cancelled}`; a `Failed` task
/// with remaining retries returns to `Pending`. Once terminal
/// (`Completed`/`Cancelled`, or `Failed` with no retries left), it never
/// re-enters the queue (spec §3, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// A unit of work submitted to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    /// Lower is more urgent.
    pub priority: i32,
    pub criticality: Criticality,
    pub required_capabilities: HashSet<String>,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub assigned_worker_id: Option<WorkerId>,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub ended_at_ms: Option<i64>,
}

impl Task {
    #[must_use]
    pub fn new(task_type: impl Into<String>, priority: i32, criticality: Criticality, payload: serde_json::Value) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            priority,
            criticality,
            required_capabilities: HashSet::new(),
            payload,
            status: TaskStatus::Pending,
            attempts: 0,
            max_retries: 3,
            timeout_secs: 300,
            assigned_worker_id: None,
            created_at_ms: now_ms(),
            started_at_ms: None,
            ended_at_ms: None,
        }
    }

    #[must_use]
    pub fn requiring(mut self, capabilities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether a `Failed` task is eligible to return to `Pending`.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.attempts < self.max_retries
    }
}

#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
