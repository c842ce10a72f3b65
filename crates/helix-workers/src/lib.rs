//! SSH worker pool and worker registry for the helixcode control plane.
//!
//! Connects to declared worker hosts over SSH (verifying host keys through
//! `helix-hostkeys`), detects their capabilities/resources, tracks health,
//! and executes commands against them through `helix-sandbox`.

mod pool;
mod registry;
mod ssh;
mod types;

pub use pool::{spawn_health_check_ticker, validate_config, SshWorkerPool};
pub use registry::{InMemoryWorkerRepository, SqliteWorkerRepository, WorkerRepository};
pub use ssh::detect_capabilities;
pub use types::{
    now_ms, ExecResult, HealthStatus, Worker, WorkerAuth, WorkerConnection, WorkerId, WorkerMetricsSnapshot,
    WorkerStats, WorkerStatus,
};
