// Copyright (c) 2026 Vigil Systems
// SPDX-License-Identifier: AGPL-3.0

//! Run Engine (Application Service)
//!
//! The durable phase-sequencing state machine. Each run is driven by a
//! dedicated task through Detection → Analysis → Planning →
//! (approval gate) → Execution → Reporting → Learning, with `CANCELLED` and
//! `FAILED` reachable from any non-terminal point.
//!
//! # Commit discipline
//!
//! The driver task is the only writer of run state. Every transition is
//! committed under the run's cell lock: mutate the snapshot, persist the
//! record (snapshot + pending signal inbox), release. Queries read the last
//! committed snapshot under the same lock, so a completion flag observed
//! true always comes with its result populated, and reads never wait on an
//! in-flight agent call.
//!
//! # Signals
//!
//! External actors never mutate run state directly; they append to the
//! run's signal inbox (approve) or set the sticky cancellation flag
//! (cancel), both persisted with the record. The cancellation flag is
//! checked at every phase boundary; the inbox itself is consumed only at
//! the approval suspend. Cancel wins whenever both signals are pending at
//! the gate.
//!
//! # Crash recovery
//!
//! `resume` rehydrates every non-terminal persisted record and re-drives
//! it. Phases whose results are already committed are skipped; pending
//! signals are re-evaluated at the first decision point.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::agents::AgentContext;
use crate::application::dispatch::{ActionRegistry, AgentDispatch, ProviderFactory};
use crate::application::invocation::{idempotency_key, AgentInvoker};
use crate::domain::config::RunConfig;
use crate::domain::events::RunEvent;
use crate::domain::learning::LearningStore;
use crate::domain::phase::Phase;
use crate::domain::repository::{CheckpointStore, RepositoryError, RunRecord, RunStore};
use crate::domain::run::{Run, RunDetails, RunId, RunSignal, RunStatus, StatusView};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::llm::build_provider;

// ============================================================================
// Public API types
// ============================================================================

/// Request to start one run of the cycle.
#[derive(Debug, Clone)]
pub struct StartRun {
    /// Caller-supplied, globally unique identifier.
    pub run_id: String,
    pub domain: String,
    pub data: serde_json::Value,
    pub config: RunConfig,
    /// Skip the approval gate after Planning.
    pub auto_approve: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Starting a run with an id that already exists is rejected, never
    /// treated as an attach.
    #[error("run '{0}' already exists")]
    DuplicateRun(RunId),

    #[error("unknown run '{0}'")]
    UnknownRun(String),

    #[error("invalid run id: {0}")]
    InvalidRunId(String),

    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

// ============================================================================
// Engine
// ============================================================================

struct RunCell {
    committed: Run,
    inbox: Vec<RunSignal>,
}

struct RunHandle {
    cell: Mutex<RunCell>,
    notify: Notify,
}

struct EngineInner {
    store: Arc<dyn RunStore>,
    learning: Arc<dyn LearningStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    actions: ActionRegistry,
    providers: ProviderFactory,
    invoker: AgentInvoker,
    events: EventBus,
    runs: RwLock<HashMap<RunId, Arc<RunHandle>>>,
    tasks: Mutex<HashMap<RunId, JoinHandle<()>>>,
}

/// The orchestrator. One instance owns all runs in the process; no two
/// instances may drive the same run id.
#[derive(Clone)]
pub struct RunEngine {
    inner: Arc<EngineInner>,
}

impl RunEngine {
    /// Engine with production defaults: providers built from each phase's
    /// resolved configuration, unbounded invocation concurrency, empty
    /// action registry.
    pub fn new(
        store: Arc<dyn RunStore>,
        learning: Arc<dyn LearningStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::with_options(
            store,
            learning,
            checkpoints,
            ActionRegistry::new(),
            Arc::new(|_phase, config: &crate::domain::config::LlmConfig| build_provider(config)),
            AgentInvoker::new(),
        )
    }

    pub fn with_options(
        store: Arc<dyn RunStore>,
        learning: Arc<dyn LearningStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        actions: ActionRegistry,
        providers: ProviderFactory,
        invoker: AgentInvoker,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                learning,
                checkpoints,
                actions,
                providers,
                invoker,
                events: EventBus::with_default_capacity(),
                runs: RwLock::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the run event push feed.
    pub fn subscribe(&self) -> crate::infrastructure::event_bus::EventReceiver {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // External interface: start
    // ========================================================================

    /// Start a run. Duplicate ids are rejected with `DuplicateRun`.
    pub async fn start_run(&self, request: StartRun) -> Result<RunId, EngineError> {
        let id = RunId::new(request.run_id.clone())
            .map_err(|e| EngineError::InvalidRunId(e.to_string()))?;

        if self.inner.runs.read().await.contains_key(&id) {
            return Err(EngineError::DuplicateRun(id));
        }
        if self.inner.store.load(&id).await?.is_some() {
            return Err(EngineError::DuplicateRun(id));
        }

        let run = Run::new(
            id.clone(),
            request.domain.clone(),
            request.data,
            request.config,
            request.auto_approve,
        );
        self.inner.store.save(&RunRecord::new(run.clone())).await?;

        let created_at = run.created_at;
        let handle = Arc::new(RunHandle {
            cell: Mutex::new(RunCell {
                committed: run,
                inbox: Vec::new(),
            }),
            notify: Notify::new(),
        });

        {
            let mut runs = self.inner.runs.write().await;
            if runs.contains_key(&id) {
                return Err(EngineError::DuplicateRun(id));
            }
            runs.insert(id.clone(), handle.clone());
        }

        info!(run_id = %id, domain = %request.domain, auto_approve = request.auto_approve, "run accepted");
        self.inner.events.publish(RunEvent::RunStarted {
            run_id: id.clone(),
            domain: request.domain,
            started_at: created_at,
        });

        self.spawn_driver(id.clone(), handle).await;
        Ok(id)
    }

    /// Rehydrate and re-drive every non-terminal persisted run. Returns the
    /// number of runs resumed.
    pub async fn resume(&self) -> Result<usize, EngineError> {
        let records = self.inner.store.list_active().await?;
        let mut resumed = 0;

        for record in records {
            let id = record.run.id.clone();
            {
                let runs = self.inner.runs.read().await;
                if runs.contains_key(&id) {
                    continue;
                }
            }

            info!(run_id = %id, status = %record.run.status, "rehydrating run");
            let handle = Arc::new(RunHandle {
                cell: Mutex::new(RunCell {
                    committed: record.run,
                    inbox: record.pending_signals,
                }),
                notify: Notify::new(),
            });
            self.inner.runs.write().await.insert(id.clone(), handle.clone());
            self.spawn_driver(id, handle).await;
            resumed += 1;
        }

        Ok(resumed)
    }

    /// Abort all driver tasks (process shutdown). Committed state survives
    /// in the run store; `resume` picks the runs back up.
    pub async fn shutdown(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        for (run_id, task) in tasks.drain() {
            debug!(run_id = %run_id, "aborting run driver");
            task.abort();
        }
    }

    // ========================================================================
    // External interface: signals
    // ========================================================================

    /// Approve the pending plan. No-op unless the run is suspended in
    /// `PENDING_APPROVAL`.
    pub async fn approve_plan(&self, run_id: &str) -> Result<(), EngineError> {
        let id = self.parse_id(run_id)?;

        if let Some(handle) = self.live_handle(&id).await {
            let mut cell = handle.cell.lock().await;
            if cell.committed.status != RunStatus::PendingApproval {
                debug!(run_id = %id, status = %cell.committed.status, "approve signal ignored");
                return Ok(());
            }
            cell.inbox.push(RunSignal::Approve);
            persist_cell(&self.inner, &cell).await;
            drop(cell);
            handle.notify.notify_one();
            return Ok(());
        }

        // Not driven in this process: record the signal durably for resume.
        match self.inner.store.load(&id).await? {
            Some(mut record) => {
                if record.run.status == RunStatus::PendingApproval {
                    record.pending_signals.push(RunSignal::Approve);
                    self.inner.store.save(&record).await?;
                }
                Ok(())
            }
            None => Err(EngineError::UnknownRun(run_id.to_string())),
        }
    }

    /// Request cancellation. No-op for terminal runs; otherwise the sticky
    /// flag is honored at the run's next decision point.
    pub async fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
        let id = self.parse_id(run_id)?;

        if let Some(handle) = self.live_handle(&id).await {
            let mut cell = handle.cell.lock().await;
            if cell.committed.status.is_terminal() {
                debug!(run_id = %id, status = %cell.committed.status, "cancel signal ignored");
                return Ok(());
            }
            cell.committed.request_cancel();
            cell.inbox.push(RunSignal::Cancel);
            persist_cell(&self.inner, &cell).await;
            drop(cell);
            handle.notify.notify_one();
            return Ok(());
        }

        match self.inner.store.load(&id).await? {
            Some(mut record) => {
                if !record.run.status.is_terminal() {
                    record.run.request_cancel();
                    record.pending_signals.push(RunSignal::Cancel);
                    self.inner.store.save(&record).await?;
                }
                Ok(())
            }
            None => Err(EngineError::UnknownRun(run_id.to_string())),
        }
    }

    // ========================================================================
    // External interface: queries
    // ========================================================================

    /// Current status block. Reflects the last fully committed transition.
    pub async fn get_status(&self, run_id: &str) -> Result<StatusView, EngineError> {
        let id = self.parse_id(run_id)?;

        if let Some(handle) = self.live_handle(&id).await {
            return Ok(handle.cell.lock().await.committed.status_view());
        }
        match self.inner.store.load(&id).await? {
            Some(record) => Ok(record.run.status_view()),
            None => Err(EngineError::UnknownRun(run_id.to_string())),
        }
    }

    /// Full projection: status block, plan, and every committed result.
    pub async fn get_full(&self, run_id: &str) -> Result<RunDetails, EngineError> {
        let id = self.parse_id(run_id)?;

        if let Some(handle) = self.live_handle(&id).await {
            return Ok(handle.cell.lock().await.committed.details());
        }
        match self.inner.store.load(&id).await? {
            Some(record) => Ok(record.run.details()),
            None => Err(EngineError::UnknownRun(run_id.to_string())),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn parse_id(&self, run_id: &str) -> Result<RunId, EngineError> {
        // An id that fails validation cannot name an existing run.
        RunId::new(run_id).map_err(|_| EngineError::UnknownRun(run_id.to_string()))
    }

    async fn live_handle(&self, id: &RunId) -> Option<Arc<RunHandle>> {
        self.inner.runs.read().await.get(id).cloned()
    }

    async fn spawn_driver(&self, id: RunId, handle: Arc<RunHandle>) {
        let inner = self.inner.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            drive(inner, task_id, handle).await;
        });
        self.inner.tasks.lock().await.insert(id, task);
    }
}

// ============================================================================
// Commit helpers
// ============================================================================

async fn persist_cell(inner: &EngineInner, cell: &RunCell) {
    let record = RunRecord {
        run: cell.committed.clone(),
        pending_signals: cell.inbox.clone(),
    };
    if let Err(e) = inner.store.save(&record).await {
        error!(run_id = %record.run.id, error = %e, "failed to persist run record");
    }
}

/// Apply one transition to the committed snapshot and persist it. Returns
/// the new snapshot.
async fn commit<F>(inner: &EngineInner, handle: &RunHandle, mutate: F) -> Run
where
    F: FnOnce(&mut Run),
{
    let mut cell = handle.cell.lock().await;
    mutate(&mut cell.committed);
    persist_cell(inner, &cell).await;
    cell.committed.clone()
}

/// Decision-point check between phases. Cancellation is a sticky flag on
/// the committed snapshot; the inbox is left untouched so an approve
/// delivered early (e.g. right after a resume) still reaches the gate.
async fn cancellation_pending(handle: &RunHandle) -> bool {
    handle.cell.lock().await.committed.cancel_requested
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateOutcome {
    Approved,
    Cancelled,
}

/// Tie-break for signals pending together at the approval suspend point:
/// cancel wins, so a plan the caller no longer wants is never executed.
fn gate_decision(signals: &[RunSignal], cancel_requested: bool) -> Option<GateOutcome> {
    if cancel_requested || signals.contains(&RunSignal::Cancel) {
        Some(GateOutcome::Cancelled)
    } else if signals.contains(&RunSignal::Approve) {
        Some(GateOutcome::Approved)
    } else {
        None
    }
}

/// Suspend until an approval or cancellation signal arrives.
async fn wait_for_gate_signal(inner: &EngineInner, handle: &RunHandle) -> GateOutcome {
    loop {
        let notified = handle.notify.notified();
        {
            let mut cell = handle.cell.lock().await;
            let batch: Vec<RunSignal> = cell.inbox.drain(..).collect();
            if !batch.is_empty() {
                persist_cell(inner, &cell).await;
            }
            if let Some(outcome) = gate_decision(&batch, cell.committed.cancel_requested) {
                return outcome;
            }
        }
        notified.await;
    }
}

// ============================================================================
// Driver
// ============================================================================

async fn drive(inner: Arc<EngineInner>, id: RunId, handle: Arc<RunHandle>) {
    let (config, initial_status): (RunConfig, RunStatus) = {
        let cell = handle.cell.lock().await;
        (cell.committed.config.clone(), cell.committed.status)
    };
    if initial_status.is_terminal() {
        return;
    }

    // Resolved once per run; immutable thereafter.
    let dispatch = match AgentDispatch::resolve(
        &config,
        &inner.providers,
        inner.actions.clone(),
        inner.checkpoints.clone(),
        inner.learning.clone(),
    ) {
        Ok(dispatch) => dispatch,
        Err(e) => {
            let reason = format!("agent dispatch resolution failed: {}", e);
            error!(run_id = %id, error = %e, "cannot drive run");
            finish_failed(&inner, &handle, reason).await;
            return;
        }
    };

    for phase in Phase::ALL {
        // Decision point: cooperative cancellation between phases.
        if cancellation_pending(&handle).await {
            info!(run_id = %id, before = %phase, "cancellation honored at phase boundary");
            finish_cancelled(&inner, &handle, "run cancelled").await;
            return;
        }

        // A clean detection pass ends the cycle early.
        if phase > Phase::Detection {
            let nothing_detected = {
                let cell = handle.cell.lock().await;
                cell.committed
                    .detection
                    .as_ref()
                    .map(|d| !d.problems_detected)
                    .unwrap_or(false)
            };
            if nothing_detected {
                info!(run_id = %id, "no problems detected, completing run");
                finish_completed(&inner, &handle, "no problems detected").await;
                return;
            }
        }

        // The approval gate sits between Planning and Execution.
        if phase == Phase::Execution {
            match approval_gate(&inner, &id, &handle).await {
                GateOutcome::Approved => {}
                GateOutcome::Cancelled => {
                    info!(run_id = %id, "plan cancelled at approval gate");
                    finish_cancelled(&inner, &handle, "plan cancelled before execution").await;
                    return;
                }
            }
        }

        // Rehydration skip: a committed result means the phase already ran.
        {
            let cell = handle.cell.lock().await;
            if cell.committed.phase_complete(phase) {
                debug!(run_id = %id, phase = %phase, "phase already committed, skipping");
                continue;
            }
        }

        if !run_phase(&inner, &id, &handle, &dispatch, phase).await {
            return;
        }
    }

    finish_completed(&inner, &handle, "cycle completed successfully").await;
}

/// Resolve the approval gate. Auto-approved runs and runs without a plan
/// pass straight through; everything else suspends on the signal inbox.
async fn approval_gate(inner: &EngineInner, id: &RunId, handle: &RunHandle) -> GateOutcome {
    let (already_approved, needs_gate) = {
        let cell = handle.cell.lock().await;
        let run = &cell.committed;
        (
            run.plan_approved,
            run.plan().is_some() && !run.auto_approve,
        )
    };

    if already_approved {
        return GateOutcome::Approved;
    }

    if !needs_gate {
        commit(inner, handle, |run| run.approve()).await;
        debug!(run_id = %id, "approval gate skipped");
        return GateOutcome::Approved;
    }

    commit(inner, handle, |run| {
        // Cannot fail: the driver never reaches the gate in a terminal state.
        let _ = run.suspend_for_approval();
    })
    .await;
    info!(run_id = %id, "suspended awaiting plan approval");
    inner.events.publish(RunEvent::ApprovalRequested { run_id: id.clone() });

    match wait_for_gate_signal(inner, handle).await {
        GateOutcome::Approved => {
            commit(inner, handle, |run| run.approve()).await;
            info!(run_id = %id, "plan approved");
            inner.events.publish(RunEvent::PlanApproved { run_id: id.clone() });
            GateOutcome::Approved
        }
        GateOutcome::Cancelled => GateOutcome::Cancelled,
    }
}

/// Run one phase through the invocation boundary. Returns false when the
/// run reached a terminal state and the driver must stop.
async fn run_phase(
    inner: &EngineInner,
    id: &RunId,
    handle: &RunHandle,
    dispatch: &AgentDispatch,
    phase: Phase,
) -> bool {
    let snapshot = commit(inner, handle, |run| {
        if let Err(e) = run.begin_phase(phase) {
            warn!(run_id = %run.id, phase = %phase, error = %e, "begin_phase rejected");
        }
    })
    .await;

    info!(run_id = %id, phase = %phase, "phase started");
    inner.events.publish(RunEvent::PhaseStarted {
        run_id: id.clone(),
        phase,
    });

    let key = idempotency_key(id, phase);
    let mut ctx = AgentContext::for_phase(&snapshot, phase, key);
    let agent = dispatch.agent(phase);
    let policy = dispatch.policy(phase).clone();

    match inner.invoker.invoke(agent.as_ref(), &mut ctx, &policy).await {
        Ok(result) => {
            let success = result.meta().success;
            commit(inner, handle, |run| {
                if let Err(e) = run.record_result(result) {
                    warn!(run_id = %run.id, phase = %phase, error = %e, "result dropped");
                }
            })
            .await;
            info!(run_id = %id, phase = %phase, success, "phase completed");
            inner.events.publish(RunEvent::PhaseCompleted {
                run_id: id.clone(),
                phase,
                success,
            });
            true
        }
        Err(e) => {
            // Prior results stay committed; partial progress is inspectable.
            let reason = e.to_string();
            warn!(run_id = %id, phase = %phase, error = %reason, "phase failed, run marked FAILED");
            finish_failed(inner, handle, reason).await;
            false
        }
    }
}

async fn finish_completed(inner: &EngineInner, handle: &RunHandle, summary: &str) {
    let run = commit(inner, handle, |run| run.complete(summary)).await;
    inner.events.publish(RunEvent::RunCompleted {
        run_id: run.id.clone(),
        completed_at: run.ended_at.unwrap_or(run.created_at),
    });
}

async fn finish_failed(inner: &EngineInner, handle: &RunHandle, reason: String) {
    let run = commit(inner, handle, |run| run.fail(reason.clone())).await;
    inner.events.publish(RunEvent::RunFailed {
        run_id: run.id.clone(),
        reason,
    });
}

async fn finish_cancelled(inner: &EngineInner, handle: &RunHandle, reason: &str) {
    let run = commit(inner, handle, |run| run.cancel(reason)).await;
    inner.events.publish(RunEvent::RunCancelled {
        run_id: run.id.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_decision_cancel_wins() {
        // Both signals pending together: cancellation takes precedence.
        let both = [RunSignal::Approve, RunSignal::Cancel];
        assert_eq!(gate_decision(&both, false), Some(GateOutcome::Cancelled));

        let reversed = [RunSignal::Cancel, RunSignal::Approve];
        assert_eq!(gate_decision(&reversed, false), Some(GateOutcome::Cancelled));
    }

    #[test]
    fn test_gate_decision_sticky_cancel_flag() {
        // A cancel recorded during an earlier phase overrides a lone approve.
        let approve = [RunSignal::Approve];
        assert_eq!(gate_decision(&approve, true), Some(GateOutcome::Cancelled));
    }

    #[test]
    fn test_gate_decision_approve_alone() {
        let approve = [RunSignal::Approve];
        assert_eq!(gate_decision(&approve, false), Some(GateOutcome::Approved));
    }

    #[test]
    fn test_gate_decision_empty_keeps_waiting() {
        assert_eq!(gate_decision(&[], false), None);
    }
}
