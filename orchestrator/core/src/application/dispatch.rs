// Copyright (c) 2026 Vigil Systems
// SPDX-License-Identifier: AGPL-3.0

//! Agent Dispatch Registry
//!
//! Resolves phase → (agent implementation, LLM configuration, invocation
//! policy) once at run start, from the run's configuration cascading into
//! process-wide defaults. Resolved dispatch tables are immutable for the
//! lifetime of the run.
//!
//! Execution additionally resolves an action registry mapping action-type
//! strings to external handlers. An action with no registered handler fails
//! that single action, never the phase.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::application::agents::{
    AgentContext, AnalysisAgent, DetectionAgent, ExecutionAgent, LearningAgent, PhaseAgent,
    PlanningAgent, ReportingAgent,
};
use crate::application::invocation::InvocationPolicy;
use crate::domain::config::{LlmConfig, RunConfig};
use crate::domain::learning::LearningStore;
use crate::domain::llm::LLMProvider;
use crate::domain::phase::{Action, Phase};
use crate::domain::repository::CheckpointStore;

// ============================================================================
// Action Handlers
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),
}

/// External executor for one action type. Handlers must be safe to re-run
/// for an action id that was executed but whose completion was never
/// confirmed.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        action: &Action,
        ctx: &AgentContext,
    ) -> Result<serde_json::Value, ActionError>;
}

/// Registry of action handlers, shared read-mostly across runs.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action_type: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type.into(), handler);
    }

    pub fn resolve(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

// ============================================================================
// Provider Factory
// ============================================================================

/// Builds an LLM provider for a phase from its resolved configuration.
/// Injectable so tests can substitute scripted providers.
pub type ProviderFactory =
    Arc<dyn Fn(Phase, &LlmConfig) -> anyhow::Result<Arc<dyn LLMProvider>> + Send + Sync>;

// ============================================================================
// Dispatch
// ============================================================================

struct DispatchEntry {
    agent: Arc<dyn PhaseAgent>,
    policy: InvocationPolicy,
}

/// Immutable per-run dispatch table.
pub struct AgentDispatch {
    entries: HashMap<Phase, DispatchEntry>,
}

impl AgentDispatch {
    /// Resolve the dispatch table for one run.
    pub fn resolve(
        config: &RunConfig,
        providers: &ProviderFactory,
        actions: ActionRegistry,
        checkpoints: Arc<dyn CheckpointStore>,
        learning_store: Arc<dyn LearningStore>,
    ) -> anyhow::Result<Self> {
        let mut entries = HashMap::new();
        let make_provider = providers.as_ref();

        for phase in Phase::ALL {
            let llm_config = LlmConfig::resolve(phase, config.llm.get(&phase));
            let agent: Arc<dyn PhaseAgent> = match phase {
                Phase::Detection => {
                    let llm = make_provider(phase, &llm_config)?;
                    Arc::new(DetectionAgent::new(llm, llm_config))
                }
                Phase::Analysis => {
                    let llm = make_provider(phase, &llm_config)?;
                    Arc::new(AnalysisAgent::new(llm, llm_config))
                }
                Phase::Planning => {
                    let llm = make_provider(phase, &llm_config)?;
                    Arc::new(PlanningAgent::new(llm, llm_config))
                }
                // Execution drives external handlers, not a model.
                Phase::Execution => Arc::new(ExecutionAgent::new(
                    actions.clone(),
                    checkpoints.clone(),
                )),
                Phase::Reporting => {
                    let llm = make_provider(phase, &llm_config)?;
                    Arc::new(ReportingAgent::new(llm, llm_config))
                }
                Phase::Learning => {
                    let llm = make_provider(phase, &llm_config)?;
                    Arc::new(LearningAgent::new(llm, llm_config, learning_store.clone()))
                }
            };
            entries.insert(
                phase,
                DispatchEntry {
                    agent,
                    policy: InvocationPolicy::for_phase(phase),
                },
            );
        }

        Ok(Self { entries })
    }

    pub fn agent(&self, phase: Phase) -> Arc<dyn PhaseAgent> {
        self.entries[&phase].agent.clone()
    }

    pub fn policy(&self, phase: Phase) -> &InvocationPolicy {
        &self.entries[&phase].policy
    }
}
