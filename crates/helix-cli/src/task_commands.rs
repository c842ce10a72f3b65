//! Task submission and dispatch (spec §4.E).
//!
//! `helix-dispatch` keeps no state of its own beyond a single process —
//! there's no task store to list or cancel across invocations, so this
//! module exposes one subcommand that submits a task against a freshly
//! dialed worker and drives it to a terminal state before returning.

use std::{sync::Arc, time::Duration};

use clap::Subcommand;
use helix_config::HelixConfig;
use helix_dispatch::{Criticality, Task, TaskDispatcher, TaskStatus};
use helix_hostkeys::HostKeyStore;
use helix_sandbox::SandboxManager;
use helix_workers::{InMemoryWorkerRepository, SshWorkerPool, WorkerConnection, WorkerRepository};
use secrecy::SecretString;

#[derive(Subcommand)]
pub enum TaskAction {
    /// Submit a single shell command as a task, dial a worker to run it,
    /// and poll until the task reaches a terminal state.
    Submit {
        /// SSH host of the worker to run this task on.
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long)]
        user: String,
        #[arg(long)]
        key_path: Option<std::path::PathBuf>,
        #[arg(long, env = "HELIXCODE_WORKER_PASSWORD")]
        password: Option<String>,
        /// Shell command to run on the worker.
        #[arg(long)]
        command: String,
        /// Capabilities the worker must declare to accept this task.
        #[arg(long, value_delimiter = ',')]
        requires: Vec<String>,
        /// Lower is more urgent.
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long, value_enum, default_value = "normal")]
        criticality: CriticalityArg,
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
        /// Total time to wait for the task to reach a terminal state
        /// before giving up.
        #[arg(long, default_value_t = 60)]
        max_wait_secs: u64,
    },
}

#[derive(Clone, clap::ValueEnum)]
pub enum CriticalityArg {
    Low,
    Normal,
    Critical,
}

impl From<CriticalityArg> for Criticality {
    fn from(value: CriticalityArg) -> Self {
        match value {
            CriticalityArg::Low => Self::Low,
            CriticalityArg::Normal => Self::Normal,
            CriticalityArg::Critical => Self::Critical,
        }
    }
}

fn resolve_auth(
    key_path: Option<std::path::PathBuf>,
    password: Option<String>,
) -> anyhow::Result<helix_workers::WorkerAuth> {
    match (key_path, password) {
        (Some(path), None) => Ok(helix_workers::WorkerAuth::KeyPath(path)),
        (None, Some(password)) => Ok(helix_workers::WorkerAuth::Password(SecretString::from(password))),
        (None, None) => anyhow::bail!("one of --key-path or --password (HELIXCODE_WORKER_PASSWORD) is required"),
        (Some(_), Some(_)) => anyhow::bail!("--key-path and --password are mutually exclusive"),
    }
}

pub async fn handle_task(action: TaskAction, config: &HelixConfig) -> anyhow::Result<()> {
    match action {
        TaskAction::Submit {
            host,
            port,
            user,
            key_path,
            password,
            command,
            requires,
            priority,
            criticality,
            max_retries,
            timeout_secs,
            max_wait_secs,
        } => {
            let auth = resolve_auth(key_path, password)?;
            let conn = WorkerConnection {
                host: host.clone(),
                port,
                user,
                auth,
                known_hosts_path: std::path::PathBuf::from(&config.workers.known_hosts_path),
                strict: config.workers.strict_host_checking,
                expected_fingerprint: None,
            };

            let host_keys = Arc::new(HostKeyStore::load(config.workers.known_hosts_path.as_str())?);
            let sandbox_manager = Arc::new(SandboxManager::new(
                Duration::from_secs(config.sandbox.ttl_secs),
                config.sandbox.command_timeout_secs,
                config.sandbox.file_size_limit_blocks,
            ));
            let registry: Arc<dyn WorkerRepository> = Arc::new(InMemoryWorkerRepository::new());
            let pool = Arc::new(SshWorkerPool::new(host_keys, sandbox_manager, registry));
            let worker_id = pool.add_worker(host.clone(), host, 1, conn).await?;

            let dispatcher = Arc::new(TaskDispatcher::new(pool.clone()));

            let mut task = Task::new("shell", priority, criticality.into(), serde_json::json!({ "command": command }))
                .requiring(requires)
                .with_max_retries(max_retries);
            task.timeout_secs = timeout_secs;

            let id = dispatcher.submit(task).await;
            println!("task submitted: {id}");

            let deadline = tokio::time::Instant::now() + Duration::from_secs(max_wait_secs);
            loop {
                dispatcher.try_assign_one().await;
                let status = dispatcher.status(&id).await?;
                match status {
                    TaskStatus::Running => {
                        match pool.execute_command(&worker_id, &command).await {
                            Ok(result) => {
                                println!("exit code: {}", result.exit_code);
                                if !result.stdout.is_empty() {
                                    print!("{}", result.stdout);
                                }
                                if !result.stderr.is_empty() {
                                    eprint!("{}", result.stderr);
                                }
                                if result.degraded {
                                    println!("(ran outside a sandbox — sandbox provisioning failed)");
                                }
                                dispatcher.complete(&id, result.exit_code == 0).await?;
                            },
                            Err(e) => {
                                println!("execution failed: {e}");
                                dispatcher.complete(&id, false).await?;
                            },
                        }
                    },
                    TaskStatus::Pending => {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    },
                    terminal @ (TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled) => {
                        println!("task {id} finished: {terminal:?}");
                        return Ok(());
                    },
                }

                if tokio::time::Instant::now() >= deadline {
                    let status = dispatcher.status(&id).await?;
                    println!("timed out waiting for task {id}, last observed status: {status:?}");
                    return Ok(());
                }
            }
        },
    }
}
