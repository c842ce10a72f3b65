use serde::{Deserialize, Serialize};

/// Detected or declared hardware resources for a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerResources {
    pub cpu_count: u32,
    pub total_memory_bytes: u64,
    pub total_disk_bytes: u64,
    pub gpu_count: u32,
    pub gpu_model: Option<String>,
    pub gpu_memory_bytes: u64,
}
