//! Learning Agent
//!
//! Closes the loop: summarizes the finished cycle into an immutable learning
//! record, reads historical records for the same domain, and asks the model
//! for insights that should shape future cycles. Storage errors on append
//! propagate as a phase failure, never silently.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::agents::{complete_json, require_field, AgentContext, PhaseAgent};
use crate::application::invocation::AgentError;
use crate::domain::config::LlmConfig;
use crate::domain::learning::{LearningQuery, LearningRecord, LearningStore};
use crate::domain::llm::LLMProvider;
use crate::domain::phase::{LearningInsight, LearningResult, Phase, PhaseResult, ResultMeta};

/// How many historical records feed one learning pass.
const HISTORY_LIMIT: usize = 10;

pub struct LearningAgent {
    llm: Arc<dyn LLMProvider>,
    config: LlmConfig,
    store: Arc<dyn LearningStore>,
}

impl LearningAgent {
    pub fn new(llm: Arc<dyn LLMProvider>, config: LlmConfig, store: Arc<dyn LearningStore>) -> Self {
        Self { llm, config, store }
    }

    fn system_prompt(&self, ctx: &AgentContext) -> String {
        format!(
            r#"You are a learning agent for the {} domain.

Your task is to analyze automation cycles and extract insights that can improve future performance.

Consider:
- What patterns emerge across cycles?
- Are detection thresholds appropriate?
- Are certain problem types consistently resolved?
- Are there recurring failures or issues?
- What can be improved in future cycles?

Respond with a JSON object in this format:
{{
    "insights": [
        {{
            "id": "insight-id",
            "type": "detection|analysis|planning|execution|general",
            "description": "description of the insight",
            "confidence": 0.0-1.0
        }}
    ],
    "patterns_found": 0,
    "recommendations": ["list of recommendations for improvement"],
    "confidence": 0.0-1.0,
    "summary": "brief summary of learning analysis"
}}"#,
            ctx.domain
        )
    }

    fn user_message(
        &self,
        ctx: &AgentContext,
        current: &LearningRecord,
        history: &[LearningRecord],
    ) -> String {
        let mut message = format!(
            "Domain: {}\n\n## Current Cycle\nRun ID: {}\nSuccess: {}\n",
            ctx.domain, current.run_id, current.overall_success
        );

        if let Some(detection) = &ctx.detection {
            message.push_str(&format!(
                "\nDetection:\n- Problems found: {}\n- Confidence: {}\n",
                detection.problems.len(),
                detection.meta.confidence
            ));
        }
        if let Some(execution) = &ctx.execution {
            message.push_str(&format!(
                "\nExecution:\n- Actions executed: {}\n- Success rate: {}/{}\n",
                execution.outcomes.len(),
                execution.success_count,
                execution.outcomes.len()
            ));
        }

        if !history.is_empty() {
            message.push_str(&format!(
                "\n## Historical Cycles ({} recent)\n",
                history.len()
            ));
            for (i, record) in history.iter().enumerate() {
                message.push_str(&format!(
                    "{}. {} success={} problems={} actions={}\n",
                    i + 1,
                    record.run_id,
                    record.overall_success,
                    record.problem_types.len(),
                    record.actions.len()
                ));
            }
        }

        message.push_str("\nAnalyze these cycles and provide learning insights and recommendations.");
        message
    }

    fn validate(reply: &serde_json::Value) -> Result<(), AgentError> {
        for field in ["insights", "recommendations"] {
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

#[async_trait]
impl PhaseAgent for LearningAgent {
    fn phase(&self) -> Phase {
        Phase::Learning
    }

    async fn run(&self, ctx: &AgentContext) -> Result<PhaseResult, AgentError> {
        let mut record = LearningRecord::gather(
            ctx.run_id.clone(),
            ctx.domain.clone(),
            ctx.detection.as_ref(),
            ctx.plan(),
            ctx.execution.as_ref(),
        );

        // Historical context first, so the prompt never includes the record
        // being written.
        let history = self
            .store
            .query(&LearningQuery::for_domain(ctx.domain.clone()).with_limit(HISTORY_LIMIT))
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;

        let reply = complete_json(
            &self.llm,
            &self.config,
            &self.system_prompt(ctx),
            &self.user_message(ctx, &record, &history),
            ctx,
        )
        .await?;

        Self::validate(&reply)?;

        let insights: Vec<LearningInsight> = reply["insights"]
            .as_array()
            .unwrap_or(&vec![])
            .iter()
            .map(|i| LearningInsight {
                id: i
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                insight_type: i
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("general")
                    .to_string(),
                description: i
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                confidence: i.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5),
                supporting_runs: vec![ctx.run_id.to_string()],
                created_at: Utc::now(),
            })
            .collect();

        record.insights = insights.iter().map(|i| i.description.clone()).collect();

        // Append is the phase's durable side effect; an error here fails the
        // phase rather than dropping the record on the floor.
        self.store
            .append(&record)
            .await
            .map_err(|e| AgentError::Fatal(format!("learning store append failed: {}", e)))?;

        let confidence = reply["confidence"].as_f64().unwrap_or(0.7);

        Ok(PhaseResult::Learning(LearningResult {
            meta: ResultMeta::new(
                true,
                format!("learning complete: {} insights generated", insights.len()),
                confidence,
            ),
            patterns_found: reply
                .get("patterns_found")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize,
            recommendations: reply["recommendations"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            summary: reply
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or("learning analysis complete")
                .to_string(),
            insights,
        }))
    }
}
