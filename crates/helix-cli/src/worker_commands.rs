//! Worker pool management (spec §4.C/§4.D).
//!
//! Each invocation of this binary starts with an empty, in-process
//! `SshWorkerPool` — live SSH sessions and the pool's connection table are
//! session-scoped, not persisted. Only worker metadata survives across
//! invocations, via the SQLite-backed `WorkerRepository`. `add` dials and
//! persists; `list`/`stats` read the repository directly; `health-check`
//! is a connectivity probe that never touches the repository.

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Subcommand;
use helix_config::HelixConfig;
use helix_hostkeys::HostKeyStore;
use helix_sandbox::SandboxManager;
use helix_workers::{
    InMemoryWorkerRepository, SqliteWorkerRepository, SshWorkerPool, Worker, WorkerAuth, WorkerConnection, WorkerRepository,
};
use secrecy::SecretString;

#[derive(Subcommand)]
pub enum WorkerAction {
    /// Dial a worker over SSH, detect its capabilities, and register it.
    Add {
        /// SSH host to dial.
        #[arg(long)]
        host: String,
        /// SSH port.
        #[arg(long, default_value_t = 22)]
        port: u16,
        /// SSH user.
        #[arg(long)]
        user: String,
        /// Path to a private key file. Mutually exclusive with `--password`.
        #[arg(long)]
        key_path: Option<PathBuf>,
        /// Password auth, read from the environment rather than the
        /// command line so it never lands in shell history.
        #[arg(long, env = "HELIXCODE_WORKER_PASSWORD")]
        password: Option<String>,
        /// Hostname recorded on the `Worker` record (defaults to `--host`).
        #[arg(long)]
        hostname: Option<String>,
        /// Human-readable display name (defaults to `--host`).
        #[arg(long)]
        display_name: Option<String>,
        /// Maximum tasks this worker may run concurrently.
        #[arg(long, default_value_t = 4)]
        max_concurrent_tasks: u32,
        /// Path to the SQLite database backing the worker registry.
        #[arg(long, default_value = ".helix/workers.db")]
        database: String,
    },
    /// List every worker known to the registry.
    List {
        #[arg(long, default_value = ".helix/workers.db")]
        database: String,
    },
    /// Aggregate totals across every registered worker.
    Stats {
        #[arg(long, default_value = ".helix/workers.db")]
        database: String,
    },
    /// Dial a host and print its detected capabilities/resources without
    /// registering it.
    HealthCheck {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long)]
        user: String,
        #[arg(long)]
        key_path: Option<PathBuf>,
        #[arg(long, env = "HELIXCODE_WORKER_PASSWORD")]
        password: Option<String>,
    },
}

fn resolve_auth(key_path: Option<PathBuf>, password: Option<String>) -> anyhow::Result<WorkerAuth> {
    match (key_path, password) {
        (Some(path), None) => Ok(WorkerAuth::KeyPath(path)),
        (None, Some(password)) => Ok(WorkerAuth::Password(SecretString::from(password))),
        (None, None) => anyhow::bail!("one of --key-path or --password (HELIXCODE_WORKER_PASSWORD) is required"),
        (Some(_), Some(_)) => anyhow::bail!("--key-path and --password are mutually exclusive"),
    }
}

async fn open_registry(database: &str) -> anyhow::Result<Arc<dyn WorkerRepository>> {
    if let Some(parent) = std::path::Path::new(database).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let url = format!("sqlite://{database}?mode=rwc");
    let repo = SqliteWorkerRepository::new(&url).await?;
    Ok(Arc::new(repo))
}

fn print_worker(worker: &Worker) {
    println!(
        "{:<36}  {:<20}  {:<8?}  {:<9?}  tasks {}/{}  cpu {}  mem {}MB",
        worker.id.0,
        worker.hostname,
        worker.status,
        worker.health,
        worker.current_tasks,
        worker.max_concurrent_tasks,
        worker.resources.cpu_count,
        worker.resources.total_memory_bytes / (1024 * 1024),
    );
}

pub async fn handle_worker(action: WorkerAction, config: &HelixConfig) -> anyhow::Result<()> {
    match action {
        WorkerAction::Add {
            host,
            port,
            user,
            key_path,
            password,
            hostname,
            display_name,
            max_concurrent_tasks,
            database,
        } => {
            let auth = resolve_auth(key_path, password)?;
            let conn = WorkerConnection {
                host: host.clone(),
                port,
                user,
                auth,
                known_hosts_path: PathBuf::from(&config.workers.known_hosts_path),
                strict: config.workers.strict_host_checking,
                expected_fingerprint: None,
            };

            let host_keys = Arc::new(HostKeyStore::load(config.workers.known_hosts_path.as_str())?);
            let sandbox_manager = Arc::new(SandboxManager::new(
                Duration::from_secs(config.sandbox.ttl_secs),
                config.sandbox.command_timeout_secs,
                config.sandbox.file_size_limit_blocks,
            ));
            let registry = open_registry(&database).await?;
            let pool = SshWorkerPool::new(host_keys, sandbox_manager, registry);

            let id = pool
                .add_worker(hostname.unwrap_or_else(|| host.clone()), display_name.unwrap_or(host), max_concurrent_tasks, conn)
                .await?;
            println!("worker added: {id}");
            Ok(())
        },
        WorkerAction::List { database } => {
            let registry = open_registry(&database).await?;
            let workers = registry.list().await?;
            if workers.is_empty() {
                println!("no workers registered");
                return Ok(());
            }
            for worker in &workers {
                print_worker(worker);
            }
            Ok(())
        },
        WorkerAction::Stats { database } => {
            let registry = open_registry(&database).await?;
            let workers = registry.list().await?;
            let mut active = 0usize;
            let mut healthy = 0usize;
            let mut total_cpu = 0u32;
            let mut total_memory_bytes = 0u64;
            let mut total_gpu = 0u32;
            for worker in &workers {
                if worker.status == helix_workers::WorkerStatus::Active {
                    active += 1;
                }
                if worker.health == helix_workers::HealthStatus::Healthy {
                    healthy += 1;
                }
                total_cpu += worker.resources.cpu_count;
                total_memory_bytes += worker.resources.total_memory_bytes;
                total_gpu += worker.resources.gpu_count;
            }
            println!("total workers:   {}", workers.len());
            println!("active workers:  {active}");
            println!("healthy workers: {healthy}");
            println!("total cpu:       {total_cpu}");
            println!("total memory:    {} MB", total_memory_bytes / (1024 * 1024));
            println!("total gpu:       {total_gpu}");
            Ok(())
        },
        WorkerAction::HealthCheck { host, port, user, key_path, password } => {
            let auth = resolve_auth(key_path, password)?;
            let conn = WorkerConnection {
                host: host.clone(),
                port,
                user,
                auth,
                known_hosts_path: PathBuf::from(&config.workers.known_hosts_path),
                strict: config.workers.strict_host_checking,
                expected_fingerprint: None,
            };

            let host_keys = Arc::new(HostKeyStore::load(config.workers.known_hosts_path.as_str())?);
            let sandbox_manager = Arc::new(SandboxManager::new(
                Duration::from_secs(config.sandbox.ttl_secs),
                config.sandbox.command_timeout_secs,
                config.sandbox.file_size_limit_blocks,
            ));
            // Ephemeral registry: a health check is a probe, not a
            // registration, so nothing here should persist.
            let registry: Arc<dyn WorkerRepository> = Arc::new(InMemoryWorkerRepository::new());
            let pool = SshWorkerPool::new(host_keys, sandbox_manager, registry);

            let id = pool.add_worker(host.clone(), host, 1, conn).await?;
            let worker = pool.get(&id).await.ok_or_else(|| anyhow::anyhow!("worker vanished immediately after dial"))?;
            println!("dial succeeded: {host_reported}", host_reported = worker.hostname);
            println!("status: {:?}, health: {:?}", worker.status, worker.health);
            println!("capabilities: {}", worker.capabilities.into_iter().collect::<Vec<_>>().join(", "));
            println!("cpu: {}, memory: {} MB", worker.resources.cpu_count, worker.resources.total_memory_bytes / (1024 * 1024));
            Ok(())
        },
    }
}
