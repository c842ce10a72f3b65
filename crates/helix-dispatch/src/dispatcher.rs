//! Task dispatcher (spec §4.E): priority queue, capability-matching
//! assignment, status transitions, and retry policy.
//!
//! Backoff arithmetic (initial 1s, factor 2, capped at 60s) is hand-rolled
//! the same way the teacher hand-rolls its circuit-breaker cooldown in
//! `ProviderChain::is_tripped` rather than reaching for a generic backoff
//! crate — same shape of problem, same idiom.

use std::{collections::HashMap, sync::Arc, time::Duration};

use helix_common::{Error, Result};
use helix_metrics::{counter, dispatch as dispatch_metrics, gauge};
use helix_workers::{SshWorkerPool, Worker, WorkerId};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    queue::TaskQueue,
    types::{now_ms, Task, TaskId, TaskStatus},
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const BACKOFF_FACTOR: u32 = 2;

/// Exponential backoff for attempt number `attempts` (0-based), capped at
/// [`MAX_BACKOFF`].
#[must_use]
pub fn backoff_for_attempt(attempts: u32) -> Duration {
    let millis = INITIAL_BACKOFF.as_millis() as u64 * u64::from(BACKOFF_FACTOR.saturating_pow(attempts));
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

/// Pick the first worker satisfying the assignment predicate (spec §4.E):
/// `health=healthy`, `status=active`, `current_tasks < max_concurrent`,
/// declared capabilities a superset of the task's requirements. Ties break
/// on lowest current utilization.
#[must_use]
pub fn select_worker<'a>(workers: &'a [Worker], task: &Task) -> Option<&'a Worker> {
    workers
        .iter()
        .filter(|w| w.can_accept(&task.required_capabilities))
        .min_by(|a, b| a.utilization().partial_cmp(&b.utilization()).unwrap_or(std::cmp::Ordering::Equal))
}

/// Snapshot of task state plus bookkeeping the dispatcher keeps around
/// after a task leaves the queue (so `status()`/`cancel()` can find it).
struct TaskEntry {
    task: Task,
}

/// Priority-queue dispatcher: submits tasks, assigns them to workers,
/// tracks terminal state, and retries failures with backoff.
pub struct TaskDispatcher {
    queue: Arc<TaskQueue>,
    pool: Arc<SshWorkerPool>,
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
}

impl TaskDispatcher {
    #[must_use]
    pub fn new(pool: Arc<SshWorkerPool>) -> Self {
        Self {
            queue: Arc::new(TaskQueue::new()),
            pool,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// `Submit(task)` (spec §4.E).
    pub async fn submit(&self, task: Task) -> TaskId {
        let id = task.id.clone();
        self.tasks.write().await.insert(id.clone(), TaskEntry { task: task.clone() });
        self.queue.submit(task).await;
        counter!(dispatch_metrics::SUBMITTED_TOTAL).increment(1);
        gauge!(dispatch_metrics::QUEUE_DEPTH).increment(1.0);
        id
    }

    /// `Status(taskID)`.
    pub async fn status(&self, id: &TaskId) -> Result<TaskStatus> {
        self.tasks
            .read()
            .await
            .get(id)
            .map(|e| e.task.status)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    /// Cooperative cancellation (spec §4.E): marks `Cancelled` if the task
    /// is still pending or running. Once terminal, a cancel request is a
    /// no-op — terminal tasks never re-enter any state.
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(id).ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        if entry.task.status.is_terminal() {
            return Ok(());
        }
        entry.task.status = TaskStatus::Cancelled;
        entry.task.ended_at_ms = Some(now_ms());
        if let Some(worker_id) = entry.task.assigned_worker_id.clone() {
            self.pool.release_task(&worker_id).await;
        }
        info!(task_id = %id, "task cancelled");
        Ok(())
    }

    /// Try to assign the single next queued task to an eligible worker.
    /// Returns `false` if the queue was empty or no worker currently
    /// satisfies the task's requirements (spec §8: such a task "remains
    /// pending and is not dequeued" — here it's popped, found unassignable,
    /// and pushed back so no other caller observes an empty queue
    /// erroneously).
    pub async fn try_assign_one(&self) -> bool {
        let Some(task) = self.queue.try_poll().await else {
            return false;
        };

        let workers = self.pool.list().await;
        let Some(worker) = select_worker(&workers, &task) else {
            self.queue.submit(task).await;
            return false;
        };
        let worker_id = worker.id.clone();

        if !self.pool.reserve_task(&worker_id).await {
            // Lost the race for the last slot; requeue and let the next
            // assignment pass retry.
            self.queue.submit(task).await;
            return false;
        }

        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(&task.id) {
            entry.task.status = TaskStatus::Running;
            entry.task.assigned_worker_id = Some(worker_id.clone());
            entry.task.started_at_ms = Some(now_ms());
            entry.task.attempts += 1;
        }
        drop(tasks);

        gauge!(dispatch_metrics::QUEUE_DEPTH).decrement(1.0);
        counter!(dispatch_metrics::ASSIGNED_TOTAL).increment(1);
        info!(task_id = %task.id, worker_id = %worker_id, "task assigned");
        true
    }

    /// Record a task's terminal outcome. Failed tasks with remaining
    /// retries are scheduled to return to `Pending` after an exponential
    /// backoff rather than immediately (spec §4.E).
    pub async fn complete(&self, id: &TaskId, succeeded: bool) -> Result<()> {
        let (worker_id, should_retry, attempts) = {
            let mut tasks = self.tasks.write().await;
            let entry = tasks.get_mut(id).ok_or_else(|| Error::NotFound(format!("task {id}")))?;
            let worker_id = entry.task.assigned_worker_id.clone();

            if succeeded {
                entry.task.status = TaskStatus::Completed;
                entry.task.ended_at_ms = Some(now_ms());
                counter!(dispatch_metrics::COMPLETED_TOTAL).increment(1);
                (worker_id, false, entry.task.attempts)
            } else {
                entry.task.status = TaskStatus::Failed;
                entry.task.ended_at_ms = Some(now_ms());
                let retry = entry.task.can_retry();
                (worker_id, retry, entry.task.attempts)
            }
        };

        if let Some(worker_id) = &worker_id {
            self.pool.release_task(worker_id).await;
        }

        if should_retry {
            counter!(dispatch_metrics::RETRIES_TOTAL).increment(1);
            let delay = backoff_for_attempt(attempts);
            let queue = self.queue.clone();
            let tasks_lock = self.retry_snapshot(id).await?;
            warn!(task_id = %id, attempts, delay_ms = delay.as_millis() as u64, "task failed, scheduling retry");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.requeue(tasks_lock).await;
            });
        } else if !succeeded {
            counter!(dispatch_metrics::FAILED_TOTAL).increment(1);
        }

        Ok(())
    }

    /// Snapshot a task back to `Pending` with its assignment cleared, for
    /// re-enqueueing after a retry backoff.
    async fn retry_snapshot(&self, id: &TaskId) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(id).ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        entry.task.status = TaskStatus::Pending;
        entry.task.assigned_worker_id = None;
        Ok(entry.task.clone())
    }

    #[must_use]
    pub fn queue(&self) -> Arc<TaskQueue> {
        self.queue.clone()
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.len().await
    }
}

/// Spawn a background ticker that repeatedly tries to assign queued tasks
/// to workers, the same cadence pattern as the worker pool's health-check
/// ticker and the sandbox manager's eviction ticker.
pub fn spawn_assignment_ticker(dispatcher: Arc<TaskDispatcher>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            while dispatcher.try_assign_one().await {}
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use helix_workers::{HealthStatus, WorkerStatus};
    use serde_json::json;

    use super::*;
    use crate::types::Criticality;

    fn worker(caps: &[&str], max_concurrent: u32) -> Worker {
        let mut w = Worker::new("h", "H", max_concurrent);
        w.capabilities = caps.iter().map(|s| s.to_string()).collect();
        w
    }

    #[test]
    fn select_worker_matches_capabilities() {
        let w1 = worker(&["code-generation"], 4);
        let w2 = worker(&["testing"], 4);
        let task = Task::new("t", 5, Criticality::Normal, json!({})).requiring(["testing"]);

        let picked = select_worker(&[w1.clone(), w2.clone()], &task).expect("test");
        assert_eq!(picked.id, w2.id);
    }

    #[test]
    fn select_worker_breaks_ties_on_utilization() {
        let mut w1 = worker(&["testing"], 4);
        w1.current_tasks = 3;
        let w2 = worker(&["testing"], 4);
        let task = Task::new("t", 5, Criticality::Normal, json!({})).requiring(["testing"]);

        let picked = select_worker(&[w1.clone(), w2.clone()], &task).expect("test");
        assert_eq!(picked.id, w2.id);
    }

    #[test]
    fn select_worker_none_when_unhealthy() {
        let mut w = worker(&["testing"], 4);
        w.health = HealthStatus::Unhealthy;
        let task = Task::new("t", 5, Criticality::Normal, json!({})).requiring(["testing"]);
        assert!(select_worker(&[w], &task).is_none());
    }

    #[test]
    fn select_worker_none_when_capabilities_missing() {
        let w = worker(&["code-generation"], 4);
        let task = Task::new("t", 5, Criticality::Normal, json!({})).requiring(["cuda-computation"]);
        assert!(select_worker(&[w], &task).is_none());
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(backoff_for_attempt(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn unsatisfiable_task_remains_pending_and_is_not_dequeued() {
        let pool = Arc::new(SshWorkerPool::new(
            Arc::new(helix_hostkeys::HostKeyStore::load(std::env::temp_dir().join("helix-dispatch-test-khosts")).expect("test")),
            Arc::new(helix_sandbox::SandboxManager::new(Duration::from_secs(3600), 300, 100)),
            Arc::new(helix_workers::InMemoryWorkerRepository::new()),
        ));
        let dispatcher = TaskDispatcher::new(pool);
        let task = Task::new("t", 1, Criticality::Normal, json!({})).requiring(["cuda-computation"]);
        let id = task.id.clone();
        dispatcher.submit(task).await;

        assert!(!dispatcher.try_assign_one().await);
        assert_eq!(dispatcher.status(&id).await.expect("test"), TaskStatus::Pending);
        assert_eq!(dispatcher.queue_depth().await, 1);
    }
}
