//! Learning Store Implementations
//!
//! The durable variant appends one JSON line per record to a single file:
//! each append is one `write_all` of a complete line on an append-mode
//! handle, serialized behind an async mutex, so concurrent runs never
//! interleave records. Queries scan the file newest-first.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::learning::{LearningQuery, LearningRecord, LearningStore, StorageError};

#[derive(Clone, Default)]
pub struct InMemoryLearningStore {
    records: Arc<StdMutex<Vec<LearningRecord>>>,
}

impl InMemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LearningStore for InMemoryLearningStore {
    async fn append(&self, record: &LearningRecord) -> Result<(), StorageError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StorageError::Io("learning store mutex poisoned".into()))?;
        records.push(record.clone());
        Ok(())
    }

    async fn query(&self, filter: &LearningQuery) -> Result<Vec<LearningRecord>, StorageError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StorageError::Io("learning store mutex poisoned".into()))?;
        let mut matched: Vec<LearningRecord> = records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

/// Append-only JSONL file store.
pub struct JsonlLearningStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLearningStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl LearningStore for JsonlLearningStore {
    async fn append(&self, record: &LearningRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        // One complete line per write keeps concurrent appends whole.
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn query(&self, filter: &LearningQuery) -> Result<Vec<LearningRecord>, StorageError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut matched = Vec::new();
        for line in contents.lines().rev() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LearningRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed learning record");
                    continue;
                }
            };
            if filter.matches(&record) {
                matched.push(record);
                if let Some(limit) = filter.limit {
                    if matched.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::RunId;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(run: &str, domain: &str) -> LearningRecord {
        LearningRecord {
            run_id: RunId::new(run).unwrap(),
            domain: domain.into(),
            recorded_at: Utc::now(),
            problem_types: vec!["stale_ticket".into()],
            actions: vec![],
            confidence_outcomes: vec![],
            insights: vec!["follow up faster".into()],
            overall_success: true,
        }
    }

    #[tokio::test]
    async fn test_jsonl_append_and_query() {
        let dir = tempdir().unwrap();
        let store = JsonlLearningStore::new(dir.path().join("learning.jsonl"));

        store.append(&record("run-1", "support")).await.unwrap();
        store.append(&record("run-2", "support")).await.unwrap();
        store.append(&record("run-3", "billing")).await.unwrap();

        let support = store
            .query(&LearningQuery::for_domain("support"))
            .await
            .unwrap();
        assert_eq!(support.len(), 2);
        // Newest first.
        assert_eq!(support[0].run_id.as_str(), "run-2");

        let limited = store
            .query(&LearningQuery::for_domain("support").with_limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonlLearningStore::new(dir.path().join("learning.jsonl")));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .append(&record(&format!("run-{}", i), "support"))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every line parses: no torn or interleaved records.
        let all = store.query(&LearningQuery::default()).await.unwrap();
        assert_eq!(all.len(), 16);
    }
}
