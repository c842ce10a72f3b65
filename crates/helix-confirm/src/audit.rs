//! Audit Log (spec §4.L): append-only store of [`AuditEntry`] records,
//! same port-trait shape as [`helix_workers::WorkerRepository`].
//!
//! `InMemoryAuditStore` is the reference implementation used in tests
//! (spec §6: "the in-memory implementation is the reference for tests").
//! `JsonlAuditStore` is the on-disk default: one JSON object per line,
//! append-only, matching the external interface named in spec §6 even
//! though the teacher's own file-backed store (`moltis-cron::store_file`)
//! is a JSON array rather than JSONL — the spec's wire format wins here.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use helix_common::{Error, Result};

use crate::types::{AuditEntry, AuditFilter};

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn store(&self, entry: AuditEntry) -> Result<()>;
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>>;
    async fn clear(&self) -> Result<()>;
}

fn matches_filter(entry: &AuditEntry, filter: &AuditFilter) -> bool {
    if let Some(user) = &filter.user {
        if &entry.user != user {
            return false;
        }
    }
    if let Some(tool) = &filter.tool {
        if &entry.tool_name != tool {
            return false;
        }
    }
    if let Some(start) = filter.start_time {
        if entry.timestamp < start {
            return false;
        }
    }
    if let Some(end) = filter.end_time {
        if entry.timestamp > end {
            return false;
        }
    }
    if let Some(decision) = filter.decision {
        if entry.decision != decision {
            return false;
        }
    }
    true
}

fn apply_filter(entries: Vec<AuditEntry>, filter: &AuditFilter) -> Vec<AuditEntry> {
    let mut filtered: Vec<AuditEntry> = entries.into_iter().filter(|e| matches_filter(e, filter)).collect();
    if let Some(limit) = filter.limit {
        filtered.truncate(limit);
    }
    filtered
}

/// Reference implementation: writes are serialized by the mutex, reads
/// return a snapshot copy (spec §4.L).
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn store(&self, entry: AuditEntry) -> Result<()> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let snapshot = self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(apply_filter(snapshot, &filter))
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}

/// Appends one JSON object per line to `path` (default
/// `.helix/audit/confirmations.jsonl`). `clear()` truncates the file
/// explicitly and only then — no other operation may shrink it.
pub struct JsonlAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    /// Open (creating parent directories if needed) the JSONL file at
    /// `path` for append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        Path::new(".helix/audit/confirmations.jsonl").to_path_buf()
    }

    fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return Ok(Vec::new());
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| Error::message(format!("corrupt audit record: {e}"))))
            .collect()
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn store(&self, entry: AuditEntry) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = std::fs::OpenOptions::new().append(true).create(true).open(&self.path).map_err(Error::Io)?;
        serde_json::to_writer(&mut file, &entry).map_err(|e| Error::message(format!("writing audit entry: {e}")))?;
        file.write_all(b"\n").map_err(Error::Io)?;
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(apply_filter(self.read_all()?, &filter))
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        std::fs::OpenOptions::new().write(true).truncate(true).create(true).open(&self.path).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::types::Choice;

    fn entry(user: &str, decision: Choice) -> AuditEntry {
        AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user: user.to_string(),
            session_id: "s".to_string(),
            conversation_id: "c".to_string(),
            tool_name: "exec".to_string(),
            operation_description: "run tests".to_string(),
            decision,
            policy_name: Some("default".to_string()),
            rule_name: None,
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_and_query_roundtrip() {
        let store = InMemoryAuditStore::new();
        store.store(entry("alice", Choice::Allow)).await.expect("test");
        store.store(entry("bob", Choice::Deny)).await.expect("test");

        let all = store.query(AuditFilter::default()).await.expect("test");
        assert_eq!(all.len(), 2);

        let alice_only = store
            .query(AuditFilter {
                user: Some("alice".to_string()),
                ..Default::default()
            })
            .await
            .expect("test");
        assert_eq!(alice_only.len(), 1);
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let store = InMemoryAuditStore::new();
        store.store(entry("alice", Choice::Allow)).await.expect("test");
        store.clear().await.expect("test");
        assert!(store.query(AuditFilter::default()).await.expect("test").is_empty());
    }

    #[tokio::test]
    async fn filter_by_decision_and_limit() {
        let store = InMemoryAuditStore::new();
        for _ in 0..5 {
            store.store(entry("alice", Choice::Allow)).await.expect("test");
        }
        store.store(entry("alice", Choice::Deny)).await.expect("test");

        let limited = store
            .query(AuditFilter {
                decision: Some(Choice::Allow),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .expect("test");
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn jsonl_store_appends_one_object_per_line() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("confirmations.jsonl");
        let store = JsonlAuditStore::open(&path).expect("test");

        store.store(entry("alice", Choice::Allow)).await.expect("test");
        store.store(entry("bob", Choice::Never)).await.expect("test");

        let contents = std::fs::read_to_string(&path).expect("test");
        assert_eq!(contents.lines().count(), 2);

        let results = store.query(AuditFilter::default()).await.expect("test");
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn jsonl_clear_truncates_the_file() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("confirmations.jsonl");
        let store = JsonlAuditStore::open(&path).expect("test");
        store.store(entry("alice", Choice::Allow)).await.expect("test");

        store.clear().await.expect("test");
        assert!(store.query(AuditFilter::default()).await.expect("test").is_empty());
        assert_eq!(std::fs::read_to_string(&path).expect("test"), "");
    }

    #[tokio::test]
    async fn time_range_filter_excludes_out_of_range_entries() {
        let store = InMemoryAuditStore::new();
        store.store(entry("alice", Choice::Allow)).await.expect("test");

        let future_start = Utc::now() + Duration::hours(1);
        let filtered = store
            .query(AuditFilter {
                start_time: Some(future_start),
                ..Default::default()
            })
            .await
            .expect("test");
        assert!(filtered.is_empty());
    }
}
