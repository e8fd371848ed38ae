//! Detection Agent
//!
//! Scans the run's domain data for problems that need attention.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::agents::{complete_json, require_field, AgentContext, PhaseAgent};
use crate::application::invocation::AgentError;
use crate::domain::config::LlmConfig;
use crate::domain::llm::LLMProvider;
use crate::domain::phase::{DetectionResult, Phase, PhaseResult, Problem, ResultMeta};

pub struct DetectionAgent {
    llm: Arc<dyn LLMProvider>,
    config: LlmConfig,
}

impl DetectionAgent {
    pub fn new(llm: Arc<dyn LLMProvider>, config: LlmConfig) -> Self {
        Self { llm, config }
    }

    fn system_prompt(&self, ctx: &AgentContext) -> String {
        format!(
            r#"You are a detection agent for the {} domain.

Your task is to analyze the provided data and detect any problems or issues that need attention.

Respond with a JSON object in this format:
{{
    "problems": [
        {{
            "id": "unique-id",
            "type": "problem_type",
            "description": "description of the problem",
            "severity": "low|medium|high|critical",
            "data": {{}}
        }}
    ],
    "confidence": 0.0-1.0,
    "summary": "brief summary of findings"
}}

If no problems are found, return an empty problems array with confidence and summary."#,
            ctx.domain
        )
    }

    fn user_message(&self, ctx: &AgentContext) -> String {
        format!(
            "Domain: {}\n\nData to analyze:\n{}\n\nAnalyze this data and detect any problems or issues that need attention.",
            ctx.domain,
            serde_json::to_string_pretty(&ctx.data).unwrap_or_default()
        )
    }

    fn validate(reply: &serde_json::Value) -> Result<(), AgentError> {
        let problems = require_field(reply, "problems")?;
        let problems = problems.as_array().ok_or_else(|| AgentError::InvalidOutput {
            detail: "'problems' must be an array".to_string(),
        })?;
        for problem in problems {
            if problem.get("type").is_none() || problem.get("description").is_none() {
                return Err(AgentError::InvalidOutput {
                    detail: "each problem needs 'type' and 'description'".to_string(),
                });
            }
        }
        require_field(reply, "confidence")?;
        Ok(())
    }
}

#[async_trait]
impl PhaseAgent for DetectionAgent {
    fn phase(&self) -> Phase {
        Phase::Detection
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

        let problems: Vec<Problem> = reply["problems"]
            .as_array()
            .unwrap_or(&vec![])
            .iter()
            .map(|p| Problem {
                id: p
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                kind: p["type"].as_str().unwrap_or("unknown").to_string(),
                description: p["description"].as_str().unwrap_or_default().to_string(),
                severity: p
                    .get("severity")
                    .and_then(|v| v.as_str())
                    .unwrap_or("medium")
                    .to_string(),
                data: p.get("data").cloned().unwrap_or(serde_json::Value::Null),
            })
            .collect();

        let confidence = reply["confidence"].as_f64().unwrap_or(0.7);
        let summary = reply
            .get("summary")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("found {} problems", problems.len()));

        Ok(PhaseResult::Detection(DetectionResult {
            meta: ResultMeta::new(
                true,
                format!("detection complete: {} problems found", problems.len()),
                confidence,
            ),
            problems_detected: !problems.is_empty(),
            problems,
            summary,
        }))
    }
}
