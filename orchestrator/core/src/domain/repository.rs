// Copyright (c) 2026 Vigil Systems
// SPDX-License-Identifier: AGPL-3.0

//! Repository Interfaces
//!
//! Persistence seams for the durable pieces of the state machine: the run
//! snapshot (plus its pending signal inbox) and the per-action execution
//! checkpoint journal. On restart the engine rehydrates from these instead
//! of relying on process memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::phase::ActionOutcome;
use crate::domain::run::{Run, RunId, RunSignal};

/// What the durable substrate holds for one run: the last committed snapshot
/// and any signals delivered but not yet consumed at a decision point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: Run,
    #[serde(default)]
    pub pending_signals: Vec<RunSignal>,
}

impl RunRecord {
    pub fn new(run: Run) -> Self {
        Self {
            run,
            pending_signals: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository io error: {0}")]
    Io(String),

    #[error("repository serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RepositoryError {
    fn from(e: std::io::Error) -> Self {
        RepositoryError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(e: serde_json::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}

/// Durable store of run records. `save` must be atomic per record: readers
/// never observe a half-written snapshot.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Save (create or replace) a run record.
    async fn save(&self, record: &RunRecord) -> Result<(), RepositoryError>;

    /// Load a run record by id.
    async fn load(&self, id: &RunId) -> Result<Option<RunRecord>, RepositoryError>;

    /// All records whose run has not reached a terminal state.
    async fn list_active(&self) -> Result<Vec<RunRecord>, RepositoryError>;
}

/// Per-action completion journal for the Execution phase, keyed by the
/// invocation idempotency key. A retried invocation resumes after the last
/// confirmed action instead of restarting.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Record one confirmed action outcome under the invocation key.
    async fn record(&self, key: &str, outcome: &ActionOutcome) -> Result<(), RepositoryError>;

    /// Outcomes already confirmed for the invocation key, in execution order.
    async fn completed(&self, key: &str) -> Result<Vec<ActionOutcome>, RepositoryError>;
}
