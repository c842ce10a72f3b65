use std::{collections::HashMap, sync::Arc, time::Duration};

use helix_common::{Error, Result, WorkerResources};
use helix_metrics::{counter, sandbox as sandbox_metrics};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    provision::{cleanup_script, limits_script, mkdir_script, new_sandbox_id, useradd_script, wrap_command},
    remote::RemoteExec,
    types::{ExecOutput, ResourceCaps, Sandbox, SandboxId},
};

const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// In-memory registry of live sandboxes, with creation, execution, cleanup,
/// and TTL-based eviction. One instance per worker.
pub struct SandboxManager {
    sandboxes: RwLock<HashMap<SandboxId, Sandbox>>,
    ttl: Duration,
    command_timeout_secs: u64,
    file_size_limit_blocks: u64,
}

impl SandboxManager {
    #[must_use]
    pub fn new(ttl: Duration, command_timeout_secs: u64, file_size_limit_blocks: u64) -> Self {
        Self {
            sandboxes: RwLock::new(HashMap::new()),
            ttl,
            command_timeout_secs,
            file_size_limit_blocks,
        }
    }

    /// `CreateSandbox(workerID, Resources) -> Sandbox` (§4.B).
    ///
    /// Runs the five provisioning steps against `remote`. If any step after
    /// directory creation fails, best-effort cleanup runs before the error
    /// is returned.
    pub async fn create_sandbox(
        &self,
        remote: &dyn RemoteExec,
        worker_id: &str,
        resources: &WorkerResources,
    ) -> Result<Sandbox> {
        let (id, username) = new_sandbox_id();
        let directory = crate::provision::directory_for(&username);
        let caps = ResourceCaps::from_worker_resources(resources);

        remote
            .exec(&mkdir_script(&directory), STEP_TIMEOUT)
            .await
            .map_err(|e| Error::SandboxCreation(format!("mkdir {directory}: {e}")))?;

        if let Err(e) = remote
            .exec(&useradd_script(&username, &directory), STEP_TIMEOUT)
            .await
        {
            let _ = remote.exec(&cleanup_script(&username, &directory), STEP_TIMEOUT).await;
            return Err(Error::SandboxCreation(format!(
                "useradd {username}: {e}"
            )));
        }

        if let Err(e) = remote.exec(&limits_script(&username, caps), STEP_TIMEOUT).await {
            warn!(worker_id, username, error = %e, "best-effort limits/cgroup provisioning failed");
        }

        let now = std::time::SystemTime::now();
        let sandbox = Sandbox {
            id: id.clone(),
            worker_id: worker_id.to_string(),
            username,
            directory,
            caps,
            created_at: now,
            last_used_at: now,
        };

        self.sandboxes.write().await.insert(id.clone(), sandbox.clone());
        counter!(sandbox_metrics::CREATED_TOTAL).increment(1);
        info!(worker_id, sandbox_id = %id, "sandbox created");
        Ok(sandbox)
    }

    /// `ExecuteInSandbox(sandboxID, sshClient, command)` (§4.B).
    pub async fn execute(
        &self,
        remote: &dyn RemoteExec,
        id: &SandboxId,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let sandbox = {
            let mut sandboxes = self.sandboxes.write().await;
            let sandbox = sandboxes
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("sandbox {id}")))?;
            sandbox.last_used_at = std::time::SystemTime::now();
            sandbox.clone()
        };

        let wrapped = wrap_command(
            &sandbox.id,
            &sandbox.username,
            &sandbox.directory,
            command,
            self.command_timeout_secs,
            self.file_size_limit_blocks,
        );

        let result = remote.exec(&wrapped, timeout).await;
        match &result {
            Ok(_) => counter!(sandbox_metrics::COMMAND_EXECUTIONS_TOTAL).increment(1),
            Err(_) => counter!(sandbox_metrics::COMMAND_ERRORS_TOTAL).increment(1),
        }
        result
    }

    /// `CleanupSandbox(id)`: best-effort teardown, always drops the
    /// registry entry.
    pub async fn cleanup_sandbox(&self, remote: &dyn RemoteExec, id: &SandboxId) {
        let sandbox = self.sandboxes.write().await.remove(id);
        let Some(sandbox) = sandbox else {
            return;
        };
        if let Err(e) = remote
            .exec(&cleanup_script(&sandbox.username, &sandbox.directory), STEP_TIMEOUT)
            .await
        {
            warn!(sandbox_id = %id, error = %e, "sandbox cleanup step failed (non-fatal)");
        }
        debug!(sandbox_id = %id, "sandbox cleaned up");
    }

    /// Evict every sandbox idle past the configured TTL, cleaning each up
    /// via `remote`.
    pub async fn evict_expired(&self, remote: &dyn RemoteExec) {
        let expired: Vec<SandboxId> = self
            .sandboxes
            .read()
            .await
            .values()
            .filter(|s| s.is_idle_past(self.ttl))
            .map(|s| s.id.clone())
            .collect();

        for id in expired {
            info!(sandbox_id = %id, "evicting idle sandbox");
            counter!(sandbox_metrics::EVICTED_TOTAL).increment(1);
            self.cleanup_sandbox(remote, &id).await;
        }
    }

    #[must_use]
    pub async fn get(&self, id: &SandboxId) -> Option<Sandbox> {
        self.sandboxes.read().await.get(id).cloned()
    }

    #[must_use]
    pub async fn len(&self) -> usize {
        self.sandboxes.read().await.len()
    }
}

/// Spawn a background ticker that calls [`SandboxManager::evict_expired`]
/// on `interval`, for as long as `manager`/`remote` remain alive.
pub fn spawn_eviction_ticker(
    manager: Arc<SandboxManager>,
    remote: Arc<dyn RemoteExec>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            manager.evict_expired(remote.as_ref()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    struct FakeRemote {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl RemoteExec for FakeRemote {
        async fn exec(&self, command: &str, _timeout: Duration) -> Result<ExecOutput> {
            self.calls.lock().expect("lock").push(command.to_string());
            if let Some(needle) = self.fail_on {
                if command.contains(needle) {
                    return Err(Error::ExecutionFailed {
                        message: "boom".into(),
                        stdout: String::new(),
                        stderr: "boom".into(),
                    });
                }
            }
            Ok(ExecOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn resources() -> WorkerResources {
        WorkerResources {
            cpu_count: 4,
            total_memory_bytes: 8 * 1024 * 1024 * 1024,
            total_disk_bytes: 0,
            gpu_count: 0,
            gpu_model: None,
            gpu_memory_bytes: 0,
        }
    }

    #[tokio::test]
    async fn create_registers_sandbox_and_computes_caps() {
        let manager = SandboxManager::new(Duration::from_secs(3600), 300, 100);
        let remote = FakeRemote {
            calls: Mutex::new(Vec::new()),
            fail_on: None,
        };

        let sandbox = manager
            .create_sandbox(&remote, "worker-1", &resources())
            .await
            .expect("create");

        assert_eq!(sandbox.caps.max_memory_bytes, 4 * 1024 * 1024 * 1024);
        assert_eq!(sandbox.caps.max_cpu, 4);
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn useradd_failure_triggers_cleanup_and_surfaces_error() {
        let manager = SandboxManager::new(Duration::from_secs(3600), 300, 100);
        let remote = FakeRemote {
            calls: Mutex::new(Vec::new()),
            fail_on: Some("useradd"),
        };

        let err = manager
            .create_sandbox(&remote, "worker-1", &resources())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SandboxCreation(_)));
        assert_eq!(manager.len().await, 0);

        let calls = remote.calls.lock().expect("lock");
        assert!(calls.iter().any(|c| c.contains("userdel")));
    }

    #[tokio::test]
    async fn execute_wraps_command_with_sudo() {
        let manager = SandboxManager::new(Duration::from_secs(3600), 300, 100);
        let remote = FakeRemote {
            calls: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let sandbox = manager
            .create_sandbox(&remote, "worker-1", &resources())
            .await
            .expect("create");

        manager
            .execute(&remote, &sandbox.id, "echo hi", Duration::from_secs(5))
            .await
            .expect("execute");

        let calls = remote.calls.lock().expect("lock");
        assert!(calls.last().expect("call").contains("sudo -u"));
    }

    #[tokio::test]
    async fn evict_expired_removes_idle_sandboxes() {
        let manager = SandboxManager::new(Duration::from_millis(1), 300, 100);
        let remote = FakeRemote {
            calls: Mutex::new(Vec::new()),
            fail_on: None,
        };
        manager
            .create_sandbox(&remote, "worker-1", &resources())
            .await
            .expect("create");

        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.evict_expired(&remote).await;
        assert_eq!(manager.len().await, 0);
    }
}
