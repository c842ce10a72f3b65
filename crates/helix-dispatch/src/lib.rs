//! Priority task queue and worker assignment (spec §4.E).
//!
//! Owns no worker state itself — it borrows [`helix_workers::SshWorkerPool`]
//! for capability/health snapshots and reserves/releases per-worker task
//! slots through it, keeping the pool as the sole mutator of `Worker`.

mod dispatcher;
mod queue;
mod types;

pub use dispatcher::{backoff_for_attempt, select_worker, spawn_assignment_ticker, TaskDispatcher};
pub use queue::TaskQueue;
pub use types::{now_ms, Criticality, Task, TaskId, TaskStatus};
