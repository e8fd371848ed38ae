//! Run Domain Events
//!
//! Events published on the event bus for presentation-layer push consumers.
//! The event stream is advisory: the read model (`get_status`/`get_full`) is
//! the authoritative surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::phase::Phase;
use crate::domain::run::RunId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        domain: String,
        started_at: DateTime<Utc>,
    },
    PhaseStarted {
        run_id: RunId,
        phase: Phase,
    },
    PhaseCompleted {
        run_id: RunId,
        phase: Phase,
        success: bool,
    },
    ApprovalRequested {
        run_id: RunId,
    },
    PlanApproved {
        run_id: RunId,
    },
    RunCompleted {
        run_id: RunId,
        completed_at: DateTime<Utc>,
    },
    RunFailed {
        run_id: RunId,
        reason: String,
    },
    RunCancelled {
        run_id: RunId,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::PhaseStarted { run_id, .. }
            | RunEvent::PhaseCompleted { run_id, .. }
            | RunEvent::ApprovalRequested { run_id }
            | RunEvent::PlanApproved { run_id }
            | RunEvent::RunCompleted { run_id, .. }
            | RunEvent::RunFailed { run_id, .. }
            | RunEvent::RunCancelled { run_id } => run_id,
        }
    }
}
