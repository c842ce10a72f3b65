use std::time::{Duration, SystemTime};

use helix_common::WorkerResources;

/// Identifies a sandbox. Stable for the sandbox's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxId(pub String);

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource caps derived from a worker's declared resources at creation
/// time (§4.B step 3: `MaxMemory = TotalMemory/2`, `MaxCPU = CPUCount`,
/// `MaxProcesses = 100`, `NetworkAccess = false`).
#[derive(Debug, Clone, Copy)]
pub struct ResourceCaps {
    pub max_memory_bytes: u64,
    pub max_cpu: u32,
    pub max_processes: u32,
    pub network_access: bool,
}

impl ResourceCaps {
    #[must_use]
    pub fn from_worker_resources(resources: &WorkerResources) -> Self {
        Self {
            max_memory_bytes: resources.total_memory_bytes / 2,
            max_cpu: resources.cpu_count,
            max_processes: 100,
            network_access: false,
        }
    }
}

/// A provisioned sandbox: a dedicated OS user and directory on a worker,
/// with resource caps applied via per-user limits and (best-effort) a
/// cgroup.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub id: SandboxId,
    pub worker_id: String,
    pub username: String,
    pub directory: String,
    pub caps: ResourceCaps,
    pub created_at: SystemTime,
    pub last_used_at: SystemTime,
}

impl Sandbox {
    #[must_use]
    pub fn is_idle_past(&self, ttl: Duration) -> bool {
        self.last_used_at
            .elapsed()
            .map(|idle| idle > ttl)
            .unwrap_or(false)
    }
}

/// Output of a command executed on a worker, sandboxed or not.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}
