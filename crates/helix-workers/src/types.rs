use std::{
    collections::HashSet,
    time::{SystemTime, UNIX_EPOCH},
};

use helix_common::WorkerResources;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Stable worker identity. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authentication material for dialing a worker. Key and password bytes are
/// wrapped in `SecretString` so they never leak into `Debug` output, the
/// same discipline the teacher applies to provider API keys.
#[derive(Clone)]
pub enum WorkerAuth {
    PrivateKey(SecretString),
    KeyPath(std::path::PathBuf),
    Password(SecretString),
}

impl std::fmt::Debug for WorkerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrivateKey(_) => write!(f, "WorkerAuth::PrivateKey(..)"),
            Self::KeyPath(p) => write!(f, "WorkerAuth::KeyPath({})", p.display()),
            Self::Password(_) => write!(f, "WorkerAuth::Password(..)"),
        }
    }
}

/// Connection parameters for dialing a worker over SSH.
#[derive(Debug, Clone)]
pub struct WorkerConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: WorkerAuth,
    pub known_hosts_path: std::path::PathBuf,
    pub strict: bool,
    pub expected_fingerprint: Option<String>,
}

/// Operational status of a worker, driven by the health-check loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Idle,
    Offline,
    Draining,
}

/// Health as observed by the most recent dial/health-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A registered worker: identity, declared/detected capabilities, resources,
/// and the state the pool's health-check loop maintains.
///
/// Invariants (spec §3): `id` is immutable; `current_tasks <= max_concurrent`;
/// `status == Offline => health != Healthy`; only the owning pool mutates
/// `health`/`status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub hostname: String,
    pub display_name: String,
    pub capabilities: HashSet<String>,
    pub resources: WorkerResources,
    pub status: WorkerStatus,
    pub health: HealthStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub last_heartbeat_ms: Option<i64>,
    pub current_tasks: u32,
    pub max_concurrent_tasks: u32,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub disk_usage_percent: f64,
}

impl Worker {
    #[must_use]
    pub fn new(hostname: impl Into<String>, display_name: impl Into<String>, max_concurrent_tasks: u32) -> Self {
        let now = now_ms();
        Self {
            id: WorkerId::new(),
            hostname: hostname.into(),
            display_name: display_name.into(),
            capabilities: HashSet::new(),
            resources: WorkerResources::default(),
            status: WorkerStatus::Active,
            health: HealthStatus::Healthy,
            created_at_ms: now,
            updated_at_ms: now,
            last_heartbeat_ms: None,
            current_tasks: 0,
            max_concurrent_tasks,
            cpu_usage_percent: 0.0,
            memory_usage_percent: 0.0,
            disk_usage_percent: 0.0,
        }
    }

    /// Whether this worker can currently accept a task requiring `requirements`.
    #[must_use]
    pub fn can_accept(&self, requirements: &HashSet<String>) -> bool {
        self.health == HealthStatus::Healthy
            && self.status == WorkerStatus::Active
            && self.current_tasks < self.max_concurrent_tasks
            && requirements.is_subset(&self.capabilities)
    }

    /// Current utilization fraction, used to break assignment ties.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            1.0
        } else {
            f64::from(self.current_tasks) / f64::from(self.max_concurrent_tasks)
        }
    }

    pub fn mark_offline(&mut self) {
        self.status = WorkerStatus::Offline;
        self.health = HealthStatus::Unhealthy;
        self.updated_at_ms = now_ms();
    }

    pub fn mark_healthy(&mut self) {
        self.status = WorkerStatus::Active;
        self.health = HealthStatus::Healthy;
        self.updated_at_ms = now_ms();
    }
}

#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// A single time-series sample appended on every heartbeat (spec §6
/// `worker_metrics` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMetricsSnapshot {
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub current_tasks: u32,
    pub temperature_celsius: Option<f64>,
}

/// Aggregate totals returned by `GetWorkerStats` (spec §4.C).
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub total_workers: usize,
    pub active_workers: usize,
    pub healthy_workers: usize,
    pub total_cpu: u32,
    pub total_memory_bytes: u64,
    pub total_gpu: u32,
}

/// Output of a command run against a worker, sandboxed or not.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Set when the sandbox could not be created and the command ran
    /// unsandboxed as a degrade path (spec §4.C).
    pub degraded: bool,
}
