//! Reporting Agent
//!
//! Produces the human-facing narrative of the whole cycle plus a metrics
//! block. Sees every prior result.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::application::agents::{complete_json, require_field, AgentContext, PhaseAgent};
use crate::application::invocation::AgentError;
use crate::domain::config::LlmConfig;
use crate::domain::llm::LLMProvider;
use crate::domain::phase::{Phase, PhaseResult, ReportingResult, ResultMeta};

pub struct ReportingAgent {
    llm: Arc<dyn LLMProvider>,
    config: LlmConfig,
}

impl ReportingAgent {
    pub fn new(llm: Arc<dyn LLMProvider>, config: LlmConfig) -> Self {
        Self { llm, config }
    }

    fn system_prompt(&self, ctx: &AgentContext) -> String {
        format!(
            r#"You are a reporting agent for the {} domain.

Your task is to generate a comprehensive report of the automation cycle,
including what was detected, analyzed, planned, and executed.

Respond with a JSON object in this format:
{{
    "report": "A comprehensive markdown-formatted report of the entire cycle",
    "metrics": {{
        "problems_detected": 0,
        "problems_resolved": 0,
        "actions_executed": 0,
        "success_rate": 0.0
    }},
    "recommendations": ["list of recommendations for future improvements"],
    "confidence": 0.0-1.0
}}

The report should be clear, concise, and actionable."#,
            ctx.domain
        )
    }

    fn user_message(&self, ctx: &AgentContext) -> String {
        let mut message = format!("Domain: {}\nRun ID: {}\n\n", ctx.domain, ctx.run_id);

        if let Some(detection) = &ctx.detection {
            message.push_str(&format!(
                "## Detection Phase\n- Problems detected: {}\n- Confidence: {}\n- Summary: {}\n\nProblems:\n{}\n\n",
                detection.problems.len(),
                detection.meta.confidence,
                detection.summary,
                serde_json::to_string_pretty(&detection.problems).unwrap_or_default()
            ));
        }
        if let Some(analysis) = &ctx.analysis {
            message.push_str(&format!(
                "## Analysis Phase\n- Root causes identified: {}\n- Summary: {}\n\nRoot Causes:\n{}\n\nRecommendations:\n{}\n\n",
                analysis.root_causes.len(),
                analysis.summary,
                serde_json::to_string_pretty(&analysis.root_causes).unwrap_or_default(),
                serde_json::to_string_pretty(&analysis.recommendations).unwrap_or_default()
            ));
        }
        if let Some(plan) = ctx.plan() {
            message.push_str(&format!(
                "## Planning Phase\n- Actions planned: {}\n- Risk level: {}\n\nPlan:\n{}\n\n",
                plan.actions.len(),
                plan.risk_level,
                serde_json::to_string_pretty(plan).unwrap_or_default()
            ));
        }
        if let Some(execution) = &ctx.execution {
            message.push_str(&format!(
                "## Execution Phase\n- Actions executed: {}\n- Successful: {}\n- Failed: {}\n- Summary: {}\n\nAction Results:\n{}\n\n",
                execution.outcomes.len(),
                execution.success_count,
                execution.failure_count,
                execution.summary,
                serde_json::to_string_pretty(&execution.outcomes).unwrap_or_default()
            ));
        }

        message.push_str("Generate a comprehensive report of this cycle.");
        message
    }

    fn validate(reply: &serde_json::Value) -> Result<(), AgentError> {
        require_field(reply, "report")?;
        if !require_field(reply, "metrics")?.is_object() {
            return Err(AgentError::InvalidOutput {
                detail: "'metrics' must be an object".to_string(),
            });
        }
        require_field(reply, "confidence")?;
        Ok(())
    }
}

#[async_trait]
impl PhaseAgent for ReportingAgent {
    fn phase(&self) -> Phase {
        Phase::Reporting
    }

    async fn run(&self, ctx: &AgentContext) -> Result<PhaseResult, AgentError> {
        let reply = complete_json(
            &self.llm,
            &self.config,
            &self.system_prompt(ctx),
            &self.user_message(ctx),
            ctx,
        )
        .await?;

        Self::validate(&reply)?;

        let metrics: HashMap<String, serde_json::Value> = reply["metrics"]
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let confidence = reply["confidence"].as_f64().unwrap_or(0.8);

        Ok(PhaseResult::Reporting(ReportingResult {
            meta: ResultMeta::new(true, "report generated", confidence),
            report: reply["report"].as_str().unwrap_or_default().to_string(),
            metrics,
            recommendations: reply["recommendations"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
        }))
    }
}
