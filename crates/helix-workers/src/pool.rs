//! SSH worker pool (spec §4.C): validates and dials workers, maintains
//! connections, detects capabilities/resources, performs health checks, and
//! executes commands by routing through the sandbox manager.
//!
//! Concurrency discipline mirrors the teacher's `ProviderChain`/
//! `ApprovalManager` locking split: `workers` is a single `RwLock`, writers
//! are `add_worker`/`remove_worker`/health updates, readers are execution and
//! stats (spec §5).

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use helix_common::{Error, Result};
use helix_hostkeys::HostKeyStore;
use helix_metrics::{counter, workers as workers_metrics};
use helix_sandbox::{RemoteExec, SandboxManager};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{
    registry::WorkerRepository,
    ssh::{detect_capabilities, SshSession},
    types::{ExecResult, Worker, WorkerConnection, WorkerId, WorkerStats, WorkerStatus},
};

const SANDBOX_CACHE_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Live per-worker state: declared metadata, connection config, the current
/// SSH session (if any), and the cached sandbox id for this worker. `worker`
/// is behind its own `Mutex` so status/health updates don't require holding
/// the pool's top-level write lock.
struct WorkerHandle {
    worker: Mutex<Worker>,
    conn: WorkerConnection,
    session: Mutex<Option<SshSession>>,
    cached_sandbox: Mutex<Option<(helix_sandbox::SandboxId, std::time::Instant)>>,
}

/// Validate a worker connection config (spec §4.C): non-empty host/user,
/// `0 < port <= 65535`, at least one auth method present.
pub fn validate_config(conn: &WorkerConnection) -> Result<()> {
    if conn.host.is_empty() {
        return Err(Error::invalid_argument("worker host must not be empty"));
    }
    if conn.user.is_empty() {
        return Err(Error::invalid_argument("worker user must not be empty"));
    }
    if conn.port == 0 {
        return Err(Error::invalid_argument("worker port must be in 1..=65535"));
    }
    Ok(())
}

/// The pool of known, connected workers.
pub struct SshWorkerPool {
    workers: RwLock<std::collections::HashMap<WorkerId, Arc<WorkerHandle>>>,
    host_keys: Arc<HostKeyStore>,
    sandbox_manager: Arc<SandboxManager>,
    registry: Arc<dyn WorkerRepository>,
}

impl SshWorkerPool {
    #[must_use]
    pub fn new(
        host_keys: Arc<HostKeyStore>,
        sandbox_manager: Arc<SandboxManager>,
        registry: Arc<dyn WorkerRepository>,
    ) -> Self {
        Self {
            workers: RwLock::new(std::collections::HashMap::new()),
            host_keys,
            sandbox_manager,
            registry,
        }
    }

    /// `AddWorker(worker)` (spec §4.C): validate, dial once, detect
    /// capabilities, register with `status=active, health=healthy`.
    pub async fn add_worker(
        &self,
        hostname: impl Into<String>,
        display_name: impl Into<String>,
        max_concurrent_tasks: u32,
        conn: WorkerConnection,
    ) -> Result<WorkerId> {
        validate_config(&conn)?;

        counter!(workers_metrics::DIAL_ATTEMPTS_TOTAL).increment(1);
        let session = match SshSession::connect(&conn, self.host_keys.clone()).await {
            Ok(session) => session,
            Err(e) => {
                counter!(workers_metrics::DIAL_FAILURES_TOTAL).increment(1);
                return Err(e);
            },
        };

        let (capabilities, resources) = detect_capabilities(&session).await;

        let mut worker = Worker::new(hostname, display_name, max_concurrent_tasks);
        worker.capabilities = capabilities;
        worker.resources = resources;

        let id = worker.id.clone();
        self.registry.create(&worker).await?;

        let hostname = worker.hostname.clone();
        let capabilities = worker.capabilities.clone();
        let handle = Arc::new(WorkerHandle {
            worker: Mutex::new(worker),
            conn,
            session: Mutex::new(Some(session)),
            cached_sandbox: Mutex::new(None),
        });
        self.workers.write().await.insert(id.clone(), handle);

        counter!(workers_metrics::REGISTERED_TOTAL).increment(1);
        info!(worker_id = %id, %hostname, ?capabilities, "worker added");
        Ok(id)
    }

    /// Remove a worker from the pool (does not touch the registry's history).
    pub async fn remove_worker(&self, id: &WorkerId) {
        self.workers.write().await.remove(id);
    }

    #[must_use]
    pub async fn get(&self, id: &WorkerId) -> Option<Worker> {
        let workers = self.workers.read().await;
        match workers.get(id) {
            Some(h) => Some(h.worker.lock().await.clone()),
            None => None,
        }
    }

    #[must_use]
    pub async fn list(&self) -> Vec<Worker> {
        let workers = self.workers.read().await;
        let mut out = Vec::with_capacity(workers.len());
        for h in workers.values() {
            out.push(h.worker.lock().await.clone());
        }
        out
    }

    /// Ensure `handle` has a live SSH session, redialing on failure.
    async fn ensure_connected(&self, handle: &WorkerHandle) -> Result<()> {
        let mut session = handle.session.lock().await;
        if let Some(existing) = session.as_ref() {
            if existing.is_alive().await {
                return Ok(());
            }
            warn!(worker_id = %handle.worker.lock().await.id, "ssh keepalive failed, redialing");
        }
        let fresh = SshSession::connect(&handle.conn, self.host_keys.clone()).await?;
        *session = Some(fresh);
        Ok(())
    }

    /// `ExecuteCommand(workerID, command)` (spec §4.C): ensures a live
    /// connection, obtains/creates a per-worker sandbox (1h TTL cache),
    /// routes the command through the sandbox manager. Degrades to
    /// unsandboxed execution, tagged, if sandbox creation fails.
    pub async fn execute_command(&self, worker_id: &WorkerId, command: &str) -> Result<ExecResult> {
        let handle = {
            let workers = self.workers.read().await;
            workers
                .get(worker_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("worker {worker_id}")))?
        };

        self.ensure_connected(&handle).await?;

        let session_guard = handle.session.lock().await;
        let session = session_guard
            .as_ref()
            .ok_or_else(|| Error::Internal("worker session missing after ensure_connected".into()))?;
        let remote = SessionRemote { session };

        let sandbox_id = self.get_or_create_sandbox(&handle, &remote).await;

        let result = match sandbox_id {
            Some(id) => {
                let out = self
                    .sandbox_manager
                    .execute(&remote, &id, command, DEFAULT_COMMAND_TIMEOUT)
                    .await?;
                ExecResult {
                    stdout: out.stdout,
                    stderr: out.stderr,
                    exit_code: out.exit_code,
                    degraded: false,
                }
            },
            None => {
                warn!(worker_id = %worker_id, "sandbox unavailable, executing unsandboxed");
                let (stdout, stderr, exit_code) = remote.session.exec(command, DEFAULT_COMMAND_TIMEOUT).await?;
                ExecResult {
                    stdout,
                    stderr,
                    exit_code,
                    degraded: true,
                }
            },
        };

        drop(session_guard);
        handle.worker.lock().await.updated_at_ms = crate::types::now_ms();

        Ok(result)
    }

    async fn get_or_create_sandbox(
        &self,
        handle: &WorkerHandle,
        remote: &SessionRemote<'_>,
    ) -> Option<helix_sandbox::SandboxId> {
        {
            let cached = handle.cached_sandbox.lock().await;
            if let Some((id, created_at)) = cached.as_ref() {
                if created_at.elapsed() < SANDBOX_CACHE_TTL {
                    return Some(id.clone());
                }
            }
        }

        let (worker_id, resources) = {
            let worker = handle.worker.lock().await;
            (worker.id.clone(), worker.resources.clone())
        };

        match self.sandbox_manager.create_sandbox(remote, &worker_id.0, &resources).await {
            Ok(sandbox) => {
                *handle.cached_sandbox.lock().await = Some((sandbox.id.clone(), std::time::Instant::now()));
                Some(sandbox.id)
            },
            Err(e) => {
                warn!(%worker_id, error = %e, "sandbox creation failed, degrading");
                None
            },
        }
    }

    /// `HealthCheck()` (spec §4.C): fresh dial per worker; success ⇒
    /// (active, healthy), failure ⇒ (offline, unhealthy).
    pub async fn health_check(&self) {
        let handles: Vec<Arc<WorkerHandle>> = self.workers.read().await.values().cloned().collect();

        for handle in handles {
            let outcome = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, SshSession::connect(&handle.conn, self.host_keys.clone())).await;

            match outcome {
                Ok(Ok(session)) => {
                    handle.worker.lock().await.mark_healthy();
                    *handle.session.lock().await = Some(session);
                },
                _ => {
                    handle.worker.lock().await.mark_offline();
                },
            }
        }
    }

    /// `GetWorkerStats()` (spec §4.C): aggregate totals.
    pub async fn worker_stats(&self) -> WorkerStats {
        let workers = self.workers.read().await;
        let mut stats = WorkerStats {
            total_workers: workers.len(),
            ..Default::default()
        };
        for handle in workers.values() {
            let worker = handle.worker.lock().await;
            if worker.status == WorkerStatus::Active {
                stats.active_workers += 1;
            }
            if worker.health == crate::types::HealthStatus::Healthy {
                stats.healthy_workers += 1;
            }
            stats.total_cpu += worker.resources.cpu_count;
            stats.total_memory_bytes += worker.resources.total_memory_bytes;
            stats.total_gpu += worker.resources.gpu_count;
        }
        stats
    }

    #[must_use]
    pub fn required_capabilities_satisfied(worker: &Worker, requirements: &HashSet<String>) -> bool {
        worker.can_accept(requirements)
    }

    /// Reserve one task slot on `id` for the dispatcher (spec §4.E: "on
    /// assignment, increment the worker's current_tasks"). Returns `false`
    /// without mutating anything if the worker is gone or already at
    /// capacity, so the dispatcher's `current_tasks <= max_concurrent`
    /// invariant never needs a corrective rollback.
    pub async fn reserve_task(&self, id: &WorkerId) -> bool {
        let workers = self.workers.read().await;
        let Some(handle) = workers.get(id) else {
            return false;
        };
        let mut worker = handle.worker.lock().await;
        if worker.current_tasks >= worker.max_concurrent_tasks {
            return false;
        }
        worker.current_tasks += 1;
        worker.updated_at_ms = crate::types::now_ms();
        true
    }

    /// Release a task slot reserved by [`Self::reserve_task`] (spec §4.E:
    /// "on completion, decrement the counter").
    pub async fn release_task(&self, id: &WorkerId) {
        let workers = self.workers.read().await;
        let Some(handle) = workers.get(id) else {
            return;
        };
        let mut worker = handle.worker.lock().await;
        worker.current_tasks = worker.current_tasks.saturating_sub(1);
        worker.updated_at_ms = crate::types::now_ms();
    }
}

/// Bridges a live `SshSession` into `helix_sandbox::RemoteExec` so the
/// sandbox manager can provision/exec/cleanup without owning the transport.
struct SessionRemote<'a> {
    session: &'a SshSession,
}

#[async_trait]
impl RemoteExec for SessionRemote<'_> {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<helix_sandbox::ExecOutput> {
        let (stdout, stderr, exit_code) = self.session.exec(command, timeout).await?;
        Ok(helix_sandbox::ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// Spawn a background ticker that calls [`SshWorkerPool::health_check`] on
/// `interval`, the same cadence pattern as the teacher's cron/heartbeat
/// tickers.
pub fn spawn_health_check_ticker(pool: Arc<SshWorkerPool>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            pool.health_check().await;
        }
    })
}
