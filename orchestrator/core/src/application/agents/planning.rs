//! Planning Agent
//!
//! Turns the analysis into an ordered, approvable execution plan. Sees only
//! the Analysis result.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::agents::{complete_json, require_field, AgentContext, PhaseAgent};
use crate::application::invocation::AgentError;
use crate::domain::config::LlmConfig;
use crate::domain::llm::LLMProvider;
use crate::domain::phase::{Action, ExecutionPlan, Phase, PhaseResult, PlanningResult, ResultMeta};

pub struct PlanningAgent {
    llm: Arc<dyn LLMProvider>,
    config: LlmConfig,
}

impl PlanningAgent {
    pub fn new(llm: Arc<dyn LLMProvider>, config: LlmConfig) -> Self {
        Self { llm, config }
    }

    fn system_prompt(&self, ctx: &AgentContext) -> String {
        format!(
            r#"You are a planning agent for the {} domain.

Your task is to create an execution plan to address the analyzed problems.

Respond with a JSON object in this format:
{{
    "plan": {{
        "id": "plan-id",
        "actions": [
            {{
                "id": "action-id",
                "action_type": "type_of_action",
                "description": "what this action does",
                "target": "what/who this action targets",
                "parameters": {{}},
                "confidence": 0.0-1.0,
                "requires_approval": true
            }}
        ],
        "estimated_duration": "estimated time",
        "risk_level": "low|medium|high",
        "requires_approval": true
    }},
    "alternatives": [],
    "confidence": 0.0-1.0,
    "summary": "brief summary of the plan"
}}

Consider:
- What actions are needed to fix the problems
- The order of actions
- Dependencies between actions
- Risk level and approval requirements"#,
            ctx.domain
        )
    }

    fn user_message(&self, ctx: &AgentContext) -> String {
        let analysis = ctx.analysis.as_ref();
        let problems = analysis
            .map(|a| serde_json::to_value(&a.analyzed_problems).unwrap_or_default())
            .unwrap_or_default();
        let root_causes = analysis
            .map(|a| serde_json::to_value(&a.root_causes).unwrap_or_default())
            .unwrap_or_default();
        let recommendations = analysis
            .map(|a| serde_json::to_value(&a.recommendations).unwrap_or_default())
            .unwrap_or_default();

        let mut message = format!(
            "Domain: {}\n\nProblems:\n{}\n\nRoot Causes:\n{}\n\nRecommendations:\n{}\n\nContext Data:\n{}\n\nCreate a detailed execution plan to address these problems.",
            ctx.domain,
            serde_json::to_string_pretty(&problems).unwrap_or_default(),
            serde_json::to_string_pretty(&root_causes).unwrap_or_default(),
            serde_json::to_string_pretty(&recommendations).unwrap_or_default(),
            serde_json::to_string_pretty(&ctx.data).unwrap_or_default()
        );

        // Surface the registered action vocabulary when the caller provided it.
        if let Some(available) = ctx.options.get("available_actions") {
            message.push_str(&format!(
                "\n\nAvailable Actions:\n{}",
                serde_json::to_string_pretty(available).unwrap_or_default()
            ));
        }
        message
    }

    fn validate(reply: &serde_json::Value) -> Result<(), AgentError> {
        let plan = require_field(reply, "plan")?;
        let actions = require_field(plan, "actions")?;
        let actions = actions.as_array().ok_or_else(|| AgentError::InvalidOutput {
            detail: "'plan.actions' must be an array".to_string(),
        })?;
        for action in actions {
            for field in ["action_type", "description", "target"] {
                if action.get(field).is_none() {
                    return Err(AgentError::InvalidOutput {
                        detail: format!("each action needs '{}'", field),
                    });
                }
            }
        }
        require_field(reply, "confidence")?;
        Ok(())
    }

    fn parse_plan(plan: &serde_json::Value) -> ExecutionPlan {
        let mut actions: Vec<Action> = Vec::new();
        for (index, a) in plan["actions"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .enumerate()
        {
            let mut id = a
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            // Action ids must be unique within the plan; disambiguate model
            // replies that reuse one.
            if actions.iter().any(|existing| existing.id == id) {
                id = format!("{}-{}", id, index);
            }
            actions.push(Action {
                id,
                action_type: a["action_type"].as_str().unwrap_or("unknown").to_string(),
                description: a["description"].as_str().unwrap_or_default().to_string(),
                target: a["target"].as_str().unwrap_or_default().to_string(),
                parameters: a.get("parameters").cloned().unwrap_or(serde_json::Value::Null),
                confidence: a.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.7),
                requires_approval: a
                    .get("requires_approval")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
            });
        }

        ExecutionPlan {
            id: plan
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            actions,
            estimated_duration: plan
                .get("estimated_duration")
                .and_then(|v| v.as_str())
                .map(String::from),
            risk_level: plan
                .get("risk_level")
                .and_then(|v| v.as_str())
                .unwrap_or("medium")
                .to_string(),
            requires_approval: plan
                .get("requires_approval")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
        }
    }
}

#[async_trait]
impl PhaseAgent for PlanningAgent {
    fn phase(&self) -> Phase {
        Phase::Planning
    }

    async fn run(&self, ctx: &AgentContext) -> Result<PhaseResult, AgentError> {
        let has_problems = ctx
            .analysis
            .as_ref()
            .map(|a| !a.analyzed_problems.is_empty())
            .unwrap_or(false);

        if !has_problems {
            return Ok(PhaseResult::Planning(PlanningResult {
                meta: ResultMeta::new(true, "no problems to plan for", 1.0),
                plan: None,
                alternatives: vec![],
                summary: "no problems found, no planning needed".into(),
            }));
        }

        let reply = complete_json(
            &self.llm,
            &self.config,
            &self.system_prompt(ctx),
            &self.user_message(ctx),
            ctx,
        )
        .await?;

        Self::validate(&reply)?;

        let plan = Self::parse_plan(&reply["plan"]);
        let alternatives = reply["alternatives"]
            .as_array()
            .map(|alts| alts.iter().map(Self::parse_plan).collect())
            .unwrap_or_default();
        let confidence = reply["confidence"].as_f64().unwrap_or(0.7);

        Ok(PhaseResult::Planning(PlanningResult {
            meta: ResultMeta::new(
                true,
                format!("plan created with {} actions", plan.actions.len()),
                confidence,
            ),
            plan: Some(plan),
            alternatives,
            summary: reply
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or("planning complete")
                .to_string(),
        }))
    }
}
