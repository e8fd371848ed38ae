// Copyright (c) 2026 Vigil Systems
// SPDX-License-Identifier: AGPL-3.0

//! Run Domain Model
//!
//! The Run is the aggregate root for one execution of the six-phase cycle.
//! It is mutated exclusively by the phase state machine; external actors only
//! send signals. Phase results are immutable once recorded and completion
//! flags are monotonic.
//!
//! # Invariants
//!
//! - Status transitions follow the cycle order; terminal states are final
//! - A phase result can be recorded at most once
//! - The plan is immutable once the run leaves `Planning`
//! - `cancel_requested` is sticky: once set it is never cleared

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::config::RunConfig;
use crate::domain::phase::{
    AnalysisResult, DetectionResult, ExecutionPlan, ExecutionResult, LearningResult, Phase,
    PhaseResult, PlanningResult, ReportingResult,
};

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Caller-supplied, globally unique run identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Create a new RunId with validation.
    ///
    /// # Validation Rules
    /// - 1-128 characters
    /// - alphanumeric plus `-`, `_`, `.` (safe as a storage file name)
    pub fn new(id: impl Into<String>) -> Result<Self, RunError> {
        let id = id.into();
        if id.is_empty() || id.len() > 128 {
            return Err(RunError::InvalidRunId(
                "run id must be 1-128 characters".to_string(),
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(RunError::InvalidRunId(
                "run id must be alphanumeric plus '-', '_', '.'".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Value Objects: Status & Signals
// ============================================================================

/// Status of a run as it moves through the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Created,
    Detecting,
    Analyzing,
    Planning,
    PendingApproval,
    Executing,
    Reporting,
    Learning,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// The active status for a given phase.
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Detection => RunStatus::Detecting,
            Phase::Analysis => RunStatus::Analyzing,
            Phase::Planning => RunStatus::Planning,
            Phase::Execution => RunStatus::Executing,
            Phase::Reporting => RunStatus::Reporting,
            Phase::Learning => RunStatus::Learning,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Created => "CREATED",
            RunStatus::Detecting => "DETECTING",
            RunStatus::Analyzing => "ANALYZING",
            RunStatus::Planning => "PLANNING",
            RunStatus::PendingApproval => "PENDING_APPROVAL",
            RunStatus::Executing => "EXECUTING",
            RunStatus::Reporting => "REPORTING",
            RunStatus::Learning => "LEARNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// An asynchronous external event delivered to a suspended run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSignal {
    Approve,
    Cancel,
}

// ============================================================================
// Aggregate Root: Run
// ============================================================================

/// One execution instance of the six-phase cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub domain: String,
    pub data: serde_json::Value,
    pub config: RunConfig,
    pub auto_approve: bool,
    pub status: RunStatus,
    pub detection: Option<DetectionResult>,
    pub analysis: Option<AnalysisResult>,
    pub planning: Option<PlanningResult>,
    pub execution: Option<ExecutionResult>,
    pub reporting: Option<ReportingResult>,
    pub learning: Option<LearningResult>,
    pub plan_approved: bool,
    pub cancel_requested: bool,
    pub failure: Option<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        id: RunId,
        domain: impl Into<String>,
        data: serde_json::Value,
        config: RunConfig,
        auto_approve: bool,
    ) -> Self {
        Self {
            id,
            domain: domain.into(),
            data,
            config,
            auto_approve,
            status: RunStatus::Created,
            detection: None,
            analysis: None,
            planning: None,
            execution: None,
            reporting: None,
            learning: None,
            plan_approved: false,
            cancel_requested: false,
            failure: None,
            summary: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn phase_complete(&self, phase: Phase) -> bool {
        match phase {
            Phase::Detection => self.detection.is_some(),
            Phase::Analysis => self.analysis.is_some(),
            Phase::Planning => self.planning.is_some(),
            Phase::Execution => self.execution.is_some(),
            Phase::Reporting => self.reporting.is_some(),
            Phase::Learning => self.learning.is_some(),
        }
    }

    /// The plan produced by Planning, if any.
    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.planning.as_ref().and_then(|p| p.plan.as_ref())
    }

    /// Move into the active status for `phase`. Rejected from terminal states.
    pub fn begin_phase(&mut self, phase: Phase) -> Result<(), RunError> {
        if self.status.is_terminal() {
            return Err(RunError::TerminalState(self.status));
        }
        self.status = RunStatus::for_phase(phase);
        Ok(())
    }

    /// Record a phase result. Completion flags are monotonic: recording the
    /// same phase twice is a domain error.
    pub fn record_result(&mut self, result: PhaseResult) -> Result<(), RunError> {
        let phase = result.phase();
        if self.phase_complete(phase) {
            return Err(RunError::ResultAlreadyRecorded(phase));
        }
        match result {
            PhaseResult::Detection(r) => self.detection = Some(r),
            PhaseResult::Analysis(r) => self.analysis = Some(r),
            PhaseResult::Planning(r) => self.planning = Some(r),
            PhaseResult::Execution(r) => self.execution = Some(r),
            PhaseResult::Reporting(r) => self.reporting = Some(r),
            PhaseResult::Learning(r) => self.learning = Some(r),
        }
        Ok(())
    }

    pub fn suspend_for_approval(&mut self) -> Result<(), RunError> {
        if self.status.is_terminal() {
            return Err(RunError::TerminalState(self.status));
        }
        self.status = RunStatus::PendingApproval;
        Ok(())
    }

    pub fn approve(&mut self) {
        self.plan_approved = true;
    }

    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    pub fn complete(&mut self, summary: impl Into<String>) {
        self.status = RunStatus::Completed;
        self.summary = Some(summary.into());
        self.ended_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.status = RunStatus::Failed;
        self.summary = Some(format!("run failed: {}", reason));
        self.failure = Some(reason);
        self.ended_at = Some(Utc::now());
    }

    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Cancelled;
        self.summary = Some(reason.into());
        self.ended_at = Some(Utc::now());
    }

    /// Cheap status projection for `get_status`.
    pub fn status_view(&self) -> StatusView {
        StatusView {
            run_id: self.id.clone(),
            status: self.status,
            detection_complete: self.detection.is_some(),
            analysis_complete: self.analysis.is_some(),
            planning_complete: self.planning.is_some(),
            execution_complete: self.execution.is_some(),
            reporting_complete: self.reporting.is_some(),
            learning_complete: self.learning.is_some(),
            plan_approved: self.plan_approved,
            cancel_requested: self.cancel_requested,
        }
    }

    /// Full projection for `get_full`: status block, plan, and every
    /// committed phase result.
    pub fn details(&self) -> RunDetails {
        RunDetails {
            status: self.status_view(),
            domain: self.domain.clone(),
            plan: self.plan().cloned(),
            detection: self.detection.clone(),
            analysis: self.analysis.clone(),
            planning: self.planning.clone(),
            execution: self.execution.clone(),
            reporting: self.reporting.clone(),
            learning: self.learning.clone(),
            failure: self.failure.clone(),
            summary: self.summary.clone(),
            created_at: self.created_at,
            ended_at: self.ended_at,
        }
    }
}

// ============================================================================
// Read Model Projections
// ============================================================================

/// Externally queryable status block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    pub run_id: RunId,
    pub status: RunStatus,
    pub detection_complete: bool,
    pub analysis_complete: bool,
    pub planning_complete: bool,
    pub execution_complete: bool,
    pub reporting_complete: bool,
    pub learning_complete: bool,
    pub plan_approved: bool,
    pub cancel_requested: bool,
}

/// Externally queryable full projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetails {
    pub status: StatusView,
    pub domain: String,
    pub plan: Option<ExecutionPlan>,
    pub detection: Option<DetectionResult>,
    pub analysis: Option<AnalysisResult>,
    pub planning: Option<PlanningResult>,
    pub execution: Option<ExecutionResult>,
    pub reporting: Option<ReportingResult>,
    pub learning: Option<LearningResult>,
    pub failure: Option<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Domain Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid run id: {0}")]
    InvalidRunId(String),

    #[error("result for phase '{0}' already recorded")]
    ResultAlreadyRecorded(Phase),

    #[error("run is in terminal state {0}")]
    TerminalState(RunStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::phase::ResultMeta;

    fn sample_run() -> Run {
        Run::new(
            RunId::new("run-1").unwrap(),
            "support",
            serde_json::json!({"tickets": []}),
            RunConfig::default(),
            false,
        )
    }

    fn detection_result(found: bool) -> PhaseResult {
        PhaseResult::Detection(DetectionResult {
            meta: ResultMeta::new(true, "done", 0.9),
            problems_detected: found,
            problems: vec![],
            summary: "scan finished".into(),
        })
    }

    #[test]
    fn test_run_id_validation() {
        assert!(RunId::new("run-1").is_ok());
        assert!(RunId::new("run_2.retry").is_ok());
        assert!(RunId::new("").is_err());
        assert!(RunId::new("bad/id").is_err());
        assert!(RunId::new("a".repeat(129)).is_err());
    }

    #[test]
    fn test_result_recorded_once() {
        let mut run = sample_run();
        run.record_result(detection_result(true)).unwrap();
        assert!(run.phase_complete(Phase::Detection));

        let err = run.record_result(detection_result(true)).unwrap_err();
        assert!(matches!(err, RunError::ResultAlreadyRecorded(Phase::Detection)));
        // Flag survives the rejected write.
        assert!(run.phase_complete(Phase::Detection));
    }

    #[test]
    fn test_terminal_state_blocks_phase_entry() {
        let mut run = sample_run();
        run.cancel("caller cancelled");
        assert!(run.status.is_terminal());
        assert!(run.begin_phase(Phase::Detection).is_err());
    }

    #[test]
    fn test_status_view_reflects_flags() {
        let mut run = sample_run();
        run.begin_phase(Phase::Detection).unwrap();
        run.record_result(detection_result(true)).unwrap();
        run.request_cancel();

        let view = run.status_view();
        assert_eq!(view.status, RunStatus::Detecting);
        assert!(view.detection_complete);
        assert!(!view.analysis_complete);
        assert!(view.cancel_requested);
        assert!(!view.plan_approved);
    }
}
