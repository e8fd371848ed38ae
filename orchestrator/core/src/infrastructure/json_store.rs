// Copyright (c) 2026 Vigil Systems
// SPDX-License-Identifier: AGPL-3.0

//! JSON File Stores
//!
//! Durable run records and execution checkpoints as one JSON document per
//! key under a data directory. Writes go through a temp file plus rename so
//! readers (and a crashed writer) never observe a half-written snapshot.
//! Run ids and idempotency keys are validated/derived to be filename-safe.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::domain::phase::ActionOutcome;
use crate::domain::repository::{CheckpointStore, RepositoryError, RunRecord, RunStore};
use crate::domain::run::RunId;

async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), RepositoryError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, RepositoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Run records under `<dir>/runs/<run_id>.json`.
#[derive(Clone)]
pub struct JsonRunStore {
    dir: PathBuf,
}

impl JsonRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into().join("runs"),
        }
    }

    fn path_for(&self, id: &RunId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl RunStore for JsonRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.path_for(&record.run.id), bytes).await
    }

    async fn load(&self, id: &RunId) -> Result<Option<RunRecord>, RepositoryError> {
        read_json(&self.path_for(id)).await
    }

    async fn list_active(&self) -> Result<Vec<RunRecord>, RepositoryError> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<RunRecord>(&path).await {
                Ok(Some(record)) if !record.run.status.is_terminal() => records.push(record),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable run record");
                }
            }
        }
        Ok(records)
    }
}

/// Checkpoint journals under `<dir>/checkpoints/<key>.json`. Keys are hex
/// idempotency digests, already filename-safe.
#[derive(Clone)]
pub struct JsonCheckpointStore {
    dir: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into().join("checkpoints"),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl CheckpointStore for JsonCheckpointStore {
    async fn record(&self, key: &str, outcome: &ActionOutcome) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let mut outcomes: Vec<ActionOutcome> = read_json(&path).await?.unwrap_or_default();
        outcomes.push(outcome.clone());
        write_atomic(&path, serde_json::to_vec_pretty(&outcomes)?).await
    }

    async fn completed(&self, key: &str) -> Result<Vec<ActionOutcome>, RepositoryError> {
        Ok(read_json(&self.path_for(key)).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::RunConfig;
    use crate::domain::run::Run;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_record_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = RunId::new("run-1").unwrap();

        {
            let store = JsonRunStore::new(dir.path());
            let mut record = RunRecord::new(Run::new(
                id.clone(),
                "support",
                serde_json::json!({"n": 1}),
                RunConfig::default(),
                false,
            ));
            record.run.request_cancel();
            store.save(&record).await.unwrap();
        }

        let store = JsonRunStore::new(dir.path());
        let record = store.load(&id).await.unwrap().unwrap();
        assert!(record.run.cancel_requested);
        assert_eq!(store.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_append_roundtrip() {
        let dir = tempdir().unwrap();
        let store = JsonCheckpointStore::new(dir.path());

        let outcome = ActionOutcome {
            action_id: "a-1".into(),
            success: true,
            message: "ok".into(),
            data: serde_json::Value::Null,
            error: None,
        };
        store.record("abc123", &outcome).await.unwrap();
        store.record("abc123", &outcome).await.unwrap();

        assert_eq!(store.completed("abc123").await.unwrap().len(), 2);
        assert!(store.completed("other").await.unwrap().is_empty());
    }
}
