//! Priority queue of pending tasks: min-heap on `(priority asc, enqueue
//! time asc)`, guarded by a `tokio::sync::Mutex` with a `Notify` a waiting
//! `poll()` parks on — the "condition-variable wait on the task priority
//! queue" suspension point named in spec §5.

use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

use tokio::sync::{Mutex, Notify};

use crate::types::Task;

/// Heap entry ordered so `BinaryHeap::pop` (a max-heap) yields the
/// *lowest* priority number first, ties broken by earliest enqueue time.
struct Entry {
    priority: i32,
    enqueued_at_ms: i64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueued_at_ms == other.enqueued_at_ms
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest
        // (priority, enqueued_at) pair on top.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.enqueued_at_ms.cmp(&self.enqueued_at_ms))
    }
}

/// The pending-task priority queue.
#[derive(Default)]
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    notify: Notify,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    /// `Submit(task)`: enqueue, waking any waiting `poll()`.
    pub async fn submit(&self, task: Task) {
        let entry = Entry {
            priority: task.priority,
            enqueued_at_ms: crate::types::now_ms(),
            task,
        };
        self.heap.lock().await.push(entry);
        self.notify.notify_one();
    }

    /// Dequeue the highest-priority (lowest number) task, if any, without
    /// blocking.
    pub async fn try_poll(&self) -> Option<Task> {
        self.heap.lock().await.pop().map(|e| e.task)
    }

    /// Dequeue the highest-priority task, waiting for one to become
    /// available if the queue is currently empty.
    pub async fn poll(&self) -> Task {
        loop {
            if let Some(task) = self.try_poll().await {
                return task;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Re-enqueue a task (used for retry-after-backoff); wakes a waiter.
    pub async fn requeue(self: &Arc<Self>, task: Task) {
        self.submit(task).await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::Criticality;

    fn task(priority: i32) -> Task {
        Task::new("build", priority, Criticality::Normal, json!({}))
    }

    #[tokio::test]
    async fn pops_lowest_priority_number_first() {
        let q = TaskQueue::new();
        q.submit(task(5)).await;
        q.submit(task(1)).await;
        q.submit(task(3)).await;

        assert_eq!(q.try_poll().await.expect("test").priority, 1);
        assert_eq!(q.try_poll().await.expect("test").priority, 3);
        assert_eq!(q.try_poll().await.expect("test").priority, 5);
        assert!(q.try_poll().await.is_none());
    }

    #[tokio::test]
    async fn ties_broken_by_enqueue_order() {
        let q = TaskQueue::new();
        let first = task(1);
        let first_id = first.id.clone();
        q.submit(first).await;
        q.submit(task(1)).await;

        assert_eq!(q.try_poll().await.expect("test").id, first_id);
    }

    #[tokio::test]
    async fn poll_waits_for_a_submission() {
        let q = Arc::new(TaskQueue::new());
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.poll().await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        q.submit(task(1)).await;

        let polled = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("timed out")
            .expect("join");
        assert_eq!(polled.priority, 1);
    }
}
