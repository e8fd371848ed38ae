//! Execution Agent
//!
//! Runs the approved plan's actions through the external handler registry.
//! Each confirmed action is checkpointed under the invocation idempotency
//! key before the next one starts, so a retried invocation resumes instead
//! of restarting. Action-level failures (including a missing handler) are
//! captured into the outcome list and never fail the phase.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::agents::{AgentContext, PhaseAgent};
use crate::application::dispatch::ActionRegistry;
use crate::application::invocation::AgentError;
use crate::domain::phase::{ActionOutcome, ExecutionResult, Phase, PhaseResult, ResultMeta};
use crate::domain::repository::CheckpointStore;

pub struct ExecutionAgent {
    registry: ActionRegistry,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl ExecutionAgent {
    pub fn new(registry: ActionRegistry, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            registry,
            checkpoints,
        }
    }
}

#[async_trait]
impl PhaseAgent for ExecutionAgent {
    fn phase(&self) -> Phase {
        Phase::Execution
    }

    async fn run(&self, ctx: &AgentContext) -> Result<PhaseResult, AgentError> {
        let plan = match ctx.plan() {
            Some(plan) => plan.clone(),
            None => {
                return Ok(PhaseResult::Execution(ExecutionResult {
                    meta: ResultMeta::new(true, "no plan to execute", 1.0),
                    plan_id: "none".into(),
                    outcomes: vec![],
                    success_count: 0,
                    failure_count: 0,
                    summary: "no plan found, no execution needed".into(),
                }));
            }
        };

        // Resume from whatever a prior attempt already confirmed.
        let mut outcomes = self
            .checkpoints
            .completed(&ctx.idempotency_key)
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;
        if !outcomes.is_empty() {
            debug!(
                key = %ctx.idempotency_key,
                confirmed = outcomes.len(),
                "resuming execution from checkpoint"
            );
        }

        for action in &plan.actions {
            if outcomes.iter().any(|o| o.action_id == action.id) {
                continue;
            }

            let outcome = match self.registry.resolve(&action.action_type) {
                Some(handler) => match handler.execute(action, ctx).await {
                    Ok(data) => ActionOutcome {
                        action_id: action.id.clone(),
                        success: true,
                        message: format!("executed {} against {}", action.action_type, action.target),
                        data,
                        error: None,
                    },
                    Err(e) => {
                        warn!(
                            action_id = %action.id,
                            action_type = %action.action_type,
                            error = %e,
                            "action execution failed"
                        );
                        ActionOutcome {
                            action_id: action.id.clone(),
                            success: false,
                            message: format!("execution failed: {}", e),
                            data: serde_json::Value::Null,
                            error: Some(e.to_string()),
                        }
                    }
                },
                None => {
                    warn!(
                        action_id = %action.id,
                        action_type = %action.action_type,
                        "no handler registered for action type"
                    );
                    ActionOutcome {
                        action_id: action.id.clone(),
                        success: false,
                        message: format!(
                            "no handler registered for action type '{}'",
                            action.action_type
                        ),
                        data: serde_json::Value::Null,
                        error: Some("action handler missing".into()),
                    }
                }
            };

            // Confirm completion before moving on; a crash here re-runs only
            // this action, never the earlier ones.
            self.checkpoints
                .record(&ctx.idempotency_key, &outcome)
                .await
                .map_err(|e| AgentError::Transient(e.to_string()))?;
            outcomes.push(outcome);
        }

        let success_count = outcomes.iter().filter(|o| o.success).count();
        let failure_count = outcomes.len() - success_count;
        let confidence = if outcomes.is_empty() {
            1.0
        } else {
            success_count as f64 / outcomes.len() as f64
        };

        Ok(PhaseResult::Execution(ExecutionResult {
            meta: ResultMeta::new(
                failure_count == 0,
                format!(
                    "execution complete: {} succeeded, {} failed",
                    success_count, failure_count
                ),
                confidence,
            ),
            plan_id: plan.id.clone(),
            summary: format!(
                "executed {} actions with {} successes",
                outcomes.len(),
                success_count
            ),
            outcomes,
            success_count,
            failure_count,
        }))
    }
}
