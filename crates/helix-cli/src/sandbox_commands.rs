//! Sandbox provisioning (spec §4.B).
//!
//! `SandboxManager` only runs commands through a [`helix_sandbox::RemoteExec`]
//! bridge the worker pool owns internally, so the only way to exercise it
//! from this binary is through `SshWorkerPool::execute_command` — which
//! provisions (or reuses a cached) sandbox on first use. There's no
//! standalone create/cleanup surface to expose without a live pool.

use std::{sync::Arc, time::Duration};

use clap::Subcommand;
use helix_config::HelixConfig;
use helix_hostkeys::HostKeyStore;
use helix_sandbox::{ResourceCaps, SandboxManager};
use helix_workers::{InMemoryWorkerRepository, SshWorkerPool, WorkerConnection, WorkerRepository};
use secrecy::SecretString;

#[derive(Subcommand)]
pub enum SandboxAction {
    /// Dial a worker, run a command inside its sandbox, and print the
    /// resource caps the sandbox was provisioned with.
    Run {
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
        #[arg(long)]
        command: String,
    },
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

pub async fn handle_sandbox(action: SandboxAction, config: &HelixConfig) -> anyhow::Result<()> {
    match action {
        SandboxAction::Run { host, port, user, key_path, password, command } => {
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
            let pool = SshWorkerPool::new(host_keys, sandbox_manager, registry);

            let id = pool.add_worker(host.clone(), host, 1, conn).await?;
            let worker = pool.get(&id).await.ok_or_else(|| anyhow::anyhow!("worker vanished immediately after dial"))?;
            let caps = ResourceCaps::from_worker_resources(&worker.resources);
            println!(
                "sandbox caps: max_memory_bytes={} max_cpu={} max_processes={} network_access={}",
                caps.max_memory_bytes, caps.max_cpu, caps.max_processes, caps.network_access
            );

            let result = pool.execute_command(&id, &command).await?;
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
            Ok(())
        },
    }
}
