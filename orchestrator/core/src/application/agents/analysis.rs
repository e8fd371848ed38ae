//! Analysis Agent
//!
//! Takes the detected problems and works out root causes and
//! recommendations. Sees only the Detection result.

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::agents::{complete_json, require_field, AgentContext, PhaseAgent};
use crate::application::invocation::AgentError;
use crate::domain::config::LlmConfig;
use crate::domain::llm::LLMProvider;
use crate::domain::phase::{AnalysisResult, Phase, PhaseResult, ResultMeta};

pub struct AnalysisAgent {
    llm: Arc<dyn LLMProvider>,
    config: LlmConfig,
}

impl AnalysisAgent {
    pub fn new(llm: Arc<dyn LLMProvider>, config: LlmConfig) -> Self {
        Self { llm, config }
    }

    fn system_prompt(&self, ctx: &AgentContext) -> String {
        format!(
            r#"You are an analysis agent for the {} domain.

Your task is to analyze detected problems and identify root causes and provide recommendations.

Respond with a JSON object in this format:
{{
    "root_causes": ["list of identified root causes"],
    "recommendations": ["list of recommendations for addressing the issues"],
    "confidence": 0.0-1.0,
    "summary": "brief summary of the analysis"
}}"#,
            ctx.domain
        )
    }

    fn user_message(&self, ctx: &AgentContext, problems: &serde_json::Value) -> String {
        format!(
            "Domain: {}\n\nDetected Problems:\n{}\n\nContext Data:\n{}\n\nAnalyze these problems, identify root causes, and provide recommendations.",
            ctx.domain,
            serde_json::to_string_pretty(problems).unwrap_or_default(),
            serde_json::to_string_pretty(&ctx.data).unwrap_or_default()
        )
    }

    fn validate(reply: &serde_json::Value) -> Result<(), AgentError> {
        for field in ["root_causes", "recommendations"] {
            if !require_field(reply, field)?.is_array() {
                return Err(AgentError::InvalidOutput {
                    detail: format!("'{}' must be an array", field),
                });
            }
        }
        require_field(reply, "confidence")?;
        Ok(())
    }
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl PhaseAgent for AnalysisAgent {
    fn phase(&self) -> Phase {
        Phase::Analysis
    }

    async fn run(&self, ctx: &AgentContext) -> Result<PhaseResult, AgentError> {
        let detection = ctx.detection.as_ref();
        let problems: Vec<_> = detection.map(|d| d.problems.clone()).unwrap_or_default();

        // Nothing detected: nothing to analyze.
        if problems.is_empty() {
            return Ok(PhaseResult::Analysis(AnalysisResult {
                meta: ResultMeta::new(true, "no problems to analyze", 1.0),
                analyzed_problems: vec![],
                root_causes: vec![],
                recommendations: vec![],
                summary: "no problems detected, no analysis needed".into(),
            }));
        }

        let problems_json = serde_json::to_value(&problems)
            .map_err(|e| AgentError::Fatal(format!("failed to serialize problems: {}", e)))?;
        let reply = complete_json(
            &self.llm,
            &self.config,
            &self.system_prompt(ctx),
            &self.user_message(ctx, &problems_json),
            ctx,
        )
        .await?;

        Self::validate(&reply)?;

        let root_causes = string_list(&reply["root_causes"]);
        let confidence = reply["confidence"].as_f64().unwrap_or(0.7);

        Ok(PhaseResult::Analysis(AnalysisResult {
            meta: ResultMeta::new(
                true,
                format!("analysis complete: {} root causes identified", root_causes.len()),
                confidence,
            ),
            analyzed_problems: problems,
            root_causes,
            recommendations: string_list(&reply["recommendations"]),
            summary: reply
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or("analysis complete")
                .to_string(),
        }))
    }
}
