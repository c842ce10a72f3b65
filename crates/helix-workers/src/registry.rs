//! Worker registry: the authoritative, persisted store of known workers
//! (spec §4.D), modeled as a narrow repository port directly grounded in
//! `moltis-cron`'s `CronStore` / `InMemoryStore` / `SqliteStore` trio.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use helix_common::{Error, Result};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};

use crate::types::{Worker, WorkerId, WorkerMetricsSnapshot, now_ms};

/// Persistence backend for workers and their heartbeat time series.
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn create(&self, worker: &Worker) -> Result<()>;
    async fn get_by_id(&self, id: &WorkerId) -> Result<Worker>;
    async fn list(&self) -> Result<Vec<Worker>>;
    async fn update_heartbeat(&self, id: &WorkerId, metrics: WorkerMetricsSnapshot) -> Result<()>;
}

/// In-memory reference implementation, used as the teacher's `InMemoryStore`
/// is used: the default backend for tests and for a single-process
/// deployment with no database configured.
#[derive(Default)]
pub struct InMemoryWorkerRepository {
    workers: Mutex<HashMap<String, Worker>>,
}

impl InMemoryWorkerRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRepository for InMemoryWorkerRepository {
    async fn create(&self, worker: &Worker) -> Result<()> {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.insert(worker.id.0.clone(), worker.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &WorkerId) -> Result<Worker> {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers
            .get(&id.0)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("worker {id}")))
    }

    async fn list(&self) -> Result<Vec<Worker>> {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(workers.values().cloned().collect())
    }

    async fn update_heartbeat(&self, id: &WorkerId, metrics: WorkerMetricsSnapshot) -> Result<()> {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        let worker = workers
            .get_mut(&id.0)
            .ok_or_else(|| Error::NotFound(format!("worker {id}")))?;
        worker.cpu_usage_percent = metrics.cpu_usage_percent;
        worker.memory_usage_percent = metrics.memory_usage_percent;
        worker.disk_usage_percent = metrics.disk_usage_percent;
        worker.current_tasks = metrics.current_tasks;
        worker.last_heartbeat_ms = Some(now_ms());
        worker.updated_at_ms = now_ms();
        Ok(())
    }
}

/// `sqlx`-backed store for the `workers`/`worker_metrics` tables (spec §6),
/// with the same `new`/`with_pool` constructor split as the teacher's
/// `SqliteStore`.
pub struct SqliteWorkerRepository {
    pool: SqlitePool,
}

impl SqliteWorkerRepository {
    /// Create a store with its own pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::message(format!("connecting to sqlite: {e}")))?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Use an existing, already-migrated pool.
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workers (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await
        .map_err(|e| Error::message(format!("migrating workers table: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS worker_metrics (
                worker_id TEXT NOT NULL,
                recorded_at_ms INTEGER NOT NULL,
                cpu_usage_percent REAL NOT NULL,
                memory_usage_percent REAL NOT NULL,
                disk_usage_percent REAL NOT NULL,
                network_rx_bytes INTEGER NOT NULL,
                network_tx_bytes INTEGER NOT NULL,
                current_tasks_count INTEGER NOT NULL,
                temperature_celsius REAL
            )",
        )
        .execute(pool)
        .await
        .map_err(|e| Error::message(format!("migrating worker_metrics table: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl WorkerRepository for SqliteWorkerRepository {
    async fn create(&self, worker: &Worker) -> Result<()> {
        let data = serde_json::to_string(worker).map_err(|e| Error::message(e.to_string()))?;
        sqlx::query(
            "INSERT INTO workers (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(&worker.id.0)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::message(format!("inserting worker: {e}")))?;
        Ok(())
    }

    async fn get_by_id(&self, id: &WorkerId) -> Result<Worker> {
        let row = sqlx::query("SELECT data FROM workers WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::message(format!("querying worker: {e}")))?
            .ok_or_else(|| Error::NotFound(format!("worker {id}")))?;
        let data: String = row.get("data");
        serde_json::from_str(&data).map_err(|e| Error::message(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<Worker>> {
        let rows = sqlx::query("SELECT data FROM workers")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::message(format!("listing workers: {e}")))?;
        rows.into_iter()
            .map(|row| {
                let data: String = row.get("data");
                serde_json::from_str(&data).map_err(|e| Error::message(e.to_string()))
            })
            .collect()
    }

    async fn update_heartbeat(&self, id: &WorkerId, metrics: WorkerMetricsSnapshot) -> Result<()> {
        let mut worker = self.get_by_id(id).await?;
        worker.cpu_usage_percent = metrics.cpu_usage_percent;
        worker.memory_usage_percent = metrics.memory_usage_percent;
        worker.disk_usage_percent = metrics.disk_usage_percent;
        worker.current_tasks = metrics.current_tasks;
        worker.last_heartbeat_ms = Some(now_ms());
        worker.updated_at_ms = now_ms();
        self.create(&worker).await?;

        sqlx::query(
            "INSERT INTO worker_metrics (worker_id, recorded_at_ms, cpu_usage_percent,
                memory_usage_percent, disk_usage_percent, network_rx_bytes, network_tx_bytes,
                current_tasks_count, temperature_celsius)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id.0)
        .bind(now_ms())
        .bind(metrics.cpu_usage_percent)
        .bind(metrics.memory_usage_percent)
        .bind(metrics.disk_usage_percent)
        .bind(metrics.network_rx_bytes as i64)
        .bind(metrics.network_tx_bytes as i64)
        .bind(i64::from(metrics.current_tasks))
        .bind(metrics.temperature_celsius)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::message(format!("appending worker_metrics row: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkerStatus;

    fn sample_worker() -> Worker {
        Worker::new("host-a", "Host A", 4)
    }

    #[tokio::test]
    async fn in_memory_create_then_get_round_trips() {
        let repo = InMemoryWorkerRepository::new();
        let worker = sample_worker();
        repo.create(&worker).await.expect("create");

        let fetched = repo.get_by_id(&worker.id).await.expect("get");
        assert_eq!(fetched.id, worker.id);
        assert_eq!(fetched.hostname, "host-a");
    }

    #[tokio::test]
    async fn in_memory_unknown_id_is_not_found() {
        let repo = InMemoryWorkerRepository::new();
        let err = repo.get_by_id(&WorkerId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn in_memory_heartbeat_updates_metrics() {
        let repo = InMemoryWorkerRepository::new();
        let worker = sample_worker();
        repo.create(&worker).await.expect("create");

        repo.update_heartbeat(
            &worker.id,
            WorkerMetricsSnapshot {
                cpu_usage_percent: 42.0,
                memory_usage_percent: 10.0,
                disk_usage_percent: 5.0,
                network_rx_bytes: 100,
                network_tx_bytes: 200,
                current_tasks: 2,
                temperature_celsius: Some(55.0),
            },
        )
        .await
        .expect("heartbeat");

        let fetched = repo.get_by_id(&worker.id).await.expect("get");
        assert_eq!(fetched.cpu_usage_percent, 42.0);
        assert_eq!(fetched.current_tasks, 2);
        assert!(fetched.last_heartbeat_ms.is_some());
    }

    #[tokio::test]
    async fn sqlite_create_then_get_round_trips() {
        let repo = SqliteWorkerRepository::new("sqlite::memory:").await.expect("new");
        let mut worker = sample_worker();
        worker.status = WorkerStatus::Idle;
        repo.create(&worker).await.expect("create");

        let fetched = repo.get_by_id(&worker.id).await.expect("get");
        assert_eq!(fetched.status, WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn sqlite_list_returns_all() {
        let repo = SqliteWorkerRepository::new("sqlite::memory:").await.expect("new");
        repo.create(&sample_worker()).await.expect("create 1");
        repo.create(&sample_worker()).await.expect("create 2");

        let all = repo.list().await.expect("list");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn sqlite_heartbeat_appends_metrics_row() {
        let repo = SqliteWorkerRepository::new("sqlite::memory:").await.expect("new");
        let worker = sample_worker();
        repo.create(&worker).await.expect("create");

        repo.update_heartbeat(
            &worker.id,
            WorkerMetricsSnapshot {
                cpu_usage_percent: 10.0,
                memory_usage_percent: 20.0,
                disk_usage_percent: 30.0,
                network_rx_bytes: 1,
                network_tx_bytes: 2,
                current_tasks: 1,
                temperature_celsius: None,
            },
        )
        .await
        .expect("heartbeat");

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM worker_metrics WHERE worker_id = ?")
            .bind(&worker.id.0)
            .fetch_one(&repo.pool)
            .await
            .expect("count");
        assert_eq!(row.0, 1);
    }
}
