//! In-memory repository implementations, used in tests and for ephemeral
//! deployments that accept losing runs on restart. Durable variants live in
//! `json_store`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::phase::ActionOutcome;
use crate::domain::repository::{CheckpointStore, RepositoryError, RunRecord, RunStore};
use crate::domain::run::RunId;

#[derive(Clone, Default)]
pub struct InMemoryRunStore {
    records: Arc<Mutex<HashMap<RunId, RunRecord>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), RepositoryError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Io("run store mutex poisoned".into()))?;
        records.insert(record.run.id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, id: &RunId) -> Result<Option<RunRecord>, RepositoryError> {
        let records = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Io("run store mutex poisoned".into()))?;
        Ok(records.get(id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<RunRecord>, RepositoryError> {
        let records = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Io("run store mutex poisoned".into()))?;
        Ok(records
            .values()
            .filter(|r| !r.run.status.is_terminal())
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    journal: Arc<Mutex<HashMap<String, Vec<ActionOutcome>>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed confirmed outcomes for a key (test fixture for resume
    /// scenarios).
    pub fn seed(&self, key: &str, outcomes: Vec<ActionOutcome>) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.insert(key.to_string(), outcomes);
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn record(&self, key: &str, outcome: &ActionOutcome) -> Result<(), RepositoryError> {
        let mut journal = self
            .journal
            .lock()
            .map_err(|_| RepositoryError::Io("checkpoint mutex poisoned".into()))?;
        journal
            .entry(key.to_string())
            .or_default()
            .push(outcome.clone());
        Ok(())
    }

    async fn completed(&self, key: &str) -> Result<Vec<ActionOutcome>, RepositoryError> {
        let journal = self
            .journal
            .lock()
            .map_err(|_| RepositoryError::Io("checkpoint mutex poisoned".into()))?;
        Ok(journal.get(key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::RunConfig;
    use crate::domain::run::Run;

    fn record(id: &str) -> RunRecord {
        RunRecord::new(Run::new(
            RunId::new(id).unwrap(),
            "support",
            serde_json::Value::Null,
            RunConfig::default(),
            true,
        ))
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = InMemoryRunStore::new();
        store.save(&record("run-1")).await.unwrap();

        let loaded = store
            .load(&RunId::new("run-1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.run.domain, "support");
        assert!(store
            .load(&RunId::new("run-2").unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_active_excludes_terminal() {
        let store = InMemoryRunStore::new();
        store.save(&record("run-1")).await.unwrap();

        let mut done = record("run-2");
        done.run.complete("finished");
        store.save(&done).await.unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].run.id.as_str(), "run-1");
    }

    #[tokio::test]
    async fn test_checkpoint_journal_ordering() {
        let store = InMemoryCheckpointStore::new();
        for i in 0..3 {
            store
                .record(
                    "key-1",
                    &ActionOutcome {
                        action_id: format!("a-{}", i),
                        success: true,
                        message: "ok".into(),
                        data: serde_json::Value::Null,
                        error: None,
                    },
                )
                .await
                .unwrap();
        }

        let outcomes = store.completed("key-1").await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].action_id, "a-0");
        assert_eq!(outcomes[2].action_id, "a-2");
        assert!(store.completed("key-2").await.unwrap().is_empty());
    }
}
