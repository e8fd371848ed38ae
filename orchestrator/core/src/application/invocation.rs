// Copyright (c) 2026 Vigil Systems
// SPDX-License-Identifier: AGPL-3.0

//! Agent Invocation Boundary
//!
//! Uniform call contract wrapping "run phase P with input X" with timeout,
//! retry policy, and an idempotency key. Every phase goes through this
//! boundary; retry policy is orthogonal to which provider sits behind the
//! agent.
//!
//! Classification:
//! - transient failures (network, rate limit, start-to-close timeout) retry
//!   with bounded exponential backoff up to the phase's attempt cap
//! - structurally invalid agent output retries exactly once with a
//!   corrective re-prompt, then becomes a hard failure
//! - fatal failures stop immediately

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::application::agents::{AgentContext, PhaseAgent};
use crate::domain::llm::LLMError;
use crate::domain::phase::{Phase, PhaseResult};
use crate::domain::run::RunId;

/// Stable key for one (run, phase) invocation. A retried invocation carries
/// the same key, so downstream side effects can deduplicate.
pub fn idempotency_key(run_id: &RunId, phase: Phase) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_str().as_bytes());
    hasher.update(b"/");
    hasher.update(phase.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Failure modes an agent can surface to the boundary.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Worth retrying under backoff (provider timeout, rate limit, ...)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Output failed schema validation; eligible for one corrective re-prompt
    #[error("invalid agent output: {detail}")]
    InvalidOutput { detail: String },

    /// Not retryable (bad credentials, missing prerequisite, ...)
    #[error("fatal agent failure: {0}")]
    Fatal(String),
}

impl From<LLMError> for AgentError {
    fn from(e: LLMError) -> Self {
        if e.is_transient() {
            AgentError::Transient(e.to_string())
        } else {
            AgentError::Fatal(e.to_string())
        }
    }
}

/// Per-phase retry/timeout policy.
#[derive(Debug, Clone)]
pub struct InvocationPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_coefficient: f64,
    /// Start-to-close timeout for a single attempt.
    pub start_to_close: Duration,
}

impl Default for InvocationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_coefficient: 2.0,
            start_to_close: Duration::from_secs(300),
        }
    }
}

impl InvocationPolicy {
    /// Phase defaults: Execution gets a longer start-to-close window since it
    /// drives external action handlers.
    pub fn for_phase(phase: Phase) -> Self {
        let mut policy = Self::default();
        if phase == Phase::Execution {
            policy.start_to_close = Duration::from_secs(900);
        }
        policy
    }

    /// Backoff before retry number `attempt` (0-based), capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_coefficient.powi(attempt as i32);
        let backoff = self.initial_backoff.mul_f64(factor);
        backoff.min(self.max_backoff)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("phase '{phase}' exhausted {attempts} attempts: {last_error}")]
    Exhausted {
        phase: Phase,
        attempts: u32,
        last_error: String,
    },

    #[error("phase '{phase}' failed: {reason}")]
    Fatal { phase: Phase, reason: String },
}

/// Drives agents through the retry/timeout contract. Optionally bounds
/// concurrent invocations across runs (queueing hint; provider-side rate
/// capping stays external).
#[derive(Clone, Default)]
pub struct AgentInvoker {
    limiter: Option<Arc<Semaphore>>,
}

impl AgentInvoker {
    pub fn new() -> Self {
        Self { limiter: None }
    }

    pub fn with_concurrency_limit(limit: usize) -> Self {
        Self {
            limiter: Some(Arc::new(Semaphore::new(limit))),
        }
    }

    /// Invoke `agent` under `policy`. On success the returned result's
    /// variant is guaranteed to match the agent's phase.
    pub async fn invoke(
        &self,
        agent: &dyn PhaseAgent,
        ctx: &mut AgentContext,
        policy: &InvocationPolicy,
    ) -> Result<PhaseResult, InvocationError> {
        let phase = agent.phase();

        let _permit = match &self.limiter {
            Some(semaphore) => Some(semaphore.acquire().await.map_err(|_| {
                InvocationError::Fatal {
                    phase,
                    reason: "invocation limiter closed".to_string(),
                }
            })?),
            None => None,
        };

        let mut attempt = 0u32;
        let mut corrected = false;
        let mut last_error = String::new();

        while attempt < policy.max_attempts {
            debug!(
                phase = %phase,
                attempt = attempt + 1,
                key = %ctx.idempotency_key,
                "invoking phase agent"
            );

            match tokio::time::timeout(policy.start_to_close, agent.run(ctx)).await {
                Ok(Ok(result)) => {
                    if result.phase() != phase {
                        return Err(InvocationError::Fatal {
                            phase,
                            reason: format!(
                                "agent returned result for phase '{}'",
                                result.phase()
                            ),
                        });
                    }
                    return Ok(result);
                }
                Ok(Err(AgentError::InvalidOutput { detail })) => {
                    if corrected {
                        return Err(InvocationError::Fatal {
                            phase,
                            reason: format!(
                                "invalid output after corrective retry: {}",
                                detail
                            ),
                        });
                    }
                    warn!(phase = %phase, detail = %detail, "invalid agent output, re-prompting");
                    corrected = true;
                    ctx.correction = Some(detail);
                    // The single corrective retry does not consume a
                    // transient attempt.
                    continue;
                }
                Ok(Err(AgentError::Fatal(reason))) => {
                    return Err(InvocationError::Fatal { phase, reason });
                }
                Ok(Err(AgentError::Transient(reason))) => {
                    warn!(
                        phase = %phase,
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        error = %reason,
                        "transient invocation failure"
                    );
                    last_error = reason;
                }
                Err(_) => {
                    warn!(
                        phase = %phase,
                        attempt = attempt + 1,
                        timeout_secs = policy.start_to_close.as_secs(),
                        "invocation exceeded start-to-close timeout"
                    );
                    last_error = format!(
                        "start-to-close timeout of {}s exceeded",
                        policy.start_to_close.as_secs()
                    );
                }
            }

            attempt += 1;
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.backoff_for(attempt - 1)).await;
            }
        }

        Err(InvocationError::Exhausted {
            phase,
            attempts: policy.max_attempts,
            last_error,
        })
    }
}
