//! Phase Agents
//!
//! One agent per phase of the cycle. Agents receive a structured snapshot of
//! the run (domain data plus the prior results the phase is allowed to see),
//! call their configured LLM provider where needed, and validate the reply
//! into a typed phase result.
//!
//! Visibility per phase: Analysis sees Detection's result, Planning sees
//! Analysis's, Execution sees the approved plan, Reporting and Learning see
//! everything before them.

pub mod analysis;
pub mod detection;
pub mod execution;
pub mod learning;
pub mod planning;
pub mod reporting;

pub use analysis::AnalysisAgent;
pub use detection::DetectionAgent;
pub use execution::ExecutionAgent;
pub use learning::LearningAgent;
pub use planning::PlanningAgent;
pub use reporting::ReportingAgent;

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::invocation::AgentError;
use crate::domain::config::LlmConfig;
use crate::domain::llm::{GenerationOptions, LLMProvider};
use crate::domain::phase::{
    AnalysisResult, DetectionResult, ExecutionPlan, ExecutionResult, Phase, PhaseResult,
    PlanningResult, ReportingResult,
};
use crate::domain::run::{Run, RunId};

/// Snapshot handed to one phase agent invocation.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub run_id: RunId,
    pub domain: String,
    pub data: serde_json::Value,
    /// Opaque domain-specific options from the run configuration.
    pub options: serde_json::Value,
    /// Stable key for this (run, phase) invocation.
    pub idempotency_key: String,
    pub detection: Option<DetectionResult>,
    pub analysis: Option<AnalysisResult>,
    pub planning: Option<PlanningResult>,
    pub execution: Option<ExecutionResult>,
    pub reporting: Option<ReportingResult>,
    /// Validation failure from the previous attempt, set by the invocation
    /// boundary for the single corrective re-prompt.
    pub correction: Option<String>,
}

impl AgentContext {
    /// Build the snapshot for `phase`, exposing only the prior results that
    /// phase is allowed to see.
    pub fn for_phase(run: &Run, phase: Phase, idempotency_key: String) -> Self {
        let mut ctx = Self {
            run_id: run.id.clone(),
            domain: run.domain.clone(),
            data: run.data.clone(),
            options: run.config.options.clone(),
            idempotency_key,
            detection: None,
            analysis: None,
            planning: None,
            execution: None,
            reporting: None,
            correction: None,
        };
        match phase {
            Phase::Detection => {}
            Phase::Analysis => {
                ctx.detection = run.detection.clone();
            }
            Phase::Planning => {
                ctx.analysis = run.analysis.clone();
            }
            Phase::Execution => {
                ctx.planning = run.planning.clone();
            }
            Phase::Reporting | Phase::Learning => {
                ctx.detection = run.detection.clone();
                ctx.analysis = run.analysis.clone();
                ctx.planning = run.planning.clone();
                ctx.execution = run.execution.clone();
                ctx.reporting = run.reporting.clone();
            }
        }
        ctx
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.planning.as_ref().and_then(|p| p.plan.as_ref())
    }
}

/// The unit of work implementing one phase.
#[async_trait]
pub trait PhaseAgent: Send + Sync {
    fn phase(&self) -> Phase;

    async fn run(&self, ctx: &AgentContext) -> Result<PhaseResult, AgentError>;
}

// ============================================================================
// Shared LLM plumbing
// ============================================================================

/// Ask the provider for a JSON reply and parse it. The corrective hint from
/// a prior failed attempt, if any, is appended to the prompt.
pub(crate) async fn complete_json(
    llm: &Arc<dyn LLMProvider>,
    config: &LlmConfig,
    system_prompt: &str,
    user_message: &str,
    ctx: &AgentContext,
) -> Result<serde_json::Value, AgentError> {
    let mut prompt = format!("{}\n\n{}", system_prompt, user_message);
    if let Some(instructions) = &config.instructions {
        prompt.push_str("\n\nAdditional instructions:\n");
        prompt.push_str(instructions);
    }
    if let Some(correction) = &ctx.correction {
        prompt.push_str(&format!(
            "\n\nYour previous reply was rejected: {}. Respond again with a single valid JSON object and nothing else.",
            correction
        ));
    }

    let options = GenerationOptions {
        max_tokens: Some(config.max_tokens),
        temperature: Some(config.temperature),
        stop_sequences: None,
    };

    let response = llm.generate(&prompt, &options).await?;
    extract_json(&response.text)
}

/// Pull a JSON object out of an LLM reply: either the whole text, a fenced
/// ```json block, or the outermost brace span.
pub(crate) fn extract_json(text: &str) -> Result<serde_json::Value, AgentError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str(after[..end].trim()) {
                return Ok(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(AgentError::InvalidOutput {
        detail: "reply did not contain a parseable JSON object".to_string(),
    })
}

/// Missing-field helper shared by agent validators.
pub(crate) fn require_field<'a>(
    value: &'a serde_json::Value,
    field: &str,
) -> Result<&'a serde_json::Value, AgentError> {
    value.get(field).ok_or_else(|| AgentError::InvalidOutput {
        detail: format!("missing required field '{}'", field),
    })
}
