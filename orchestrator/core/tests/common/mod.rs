//! Shared fixtures: scripted LLM providers, counting action handlers, and
//! engine construction helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vigil_core::application::dispatch::{
    ActionError, ActionHandler, ActionRegistry, ProviderFactory,
};
use vigil_core::application::engine::RunEngine;
use vigil_core::application::invocation::AgentInvoker;
use vigil_core::domain::llm::{
    FinishReason, GenerationOptions, GenerationResponse, LLMError, LLMProvider, TokenUsage,
};
use vigil_core::domain::phase::{Action, Phase};
use vigil_core::domain::run::RunStatus;
use vigil_core::application::agents::AgentContext;
use vigil_core::infrastructure::learning_store::InMemoryLearningStore;
use vigil_core::infrastructure::repositories::{InMemoryCheckpointStore, InMemoryRunStore};

// ============================================================================
// Scripted provider
// ============================================================================

pub type PhaseCounters = Arc<HashMap<Phase, AtomicUsize>>;

pub fn phase_counters() -> PhaseCounters {
    Arc::new(
        Phase::ALL
            .iter()
            .map(|p| (*p, AtomicUsize::new(0)))
            .collect(),
    )
}

pub fn calls(counters: &PhaseCounters, phase: Phase) -> usize {
    counters[&phase].load(Ordering::SeqCst)
}

/// Provider that always returns one canned reply and counts invocations.
pub struct StaticProvider {
    reply: String,
    phase: Phase,
    counters: PhaseCounters,
}

#[async_trait]
impl LLMProvider for StaticProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        self.counters[&self.phase].fetch_add(1, Ordering::SeqCst);
        Ok(GenerationResponse {
            text: self.reply.clone(),
            usage: TokenUsage::default(),
            provider: "scripted".into(),
            model: "scripted".into(),
            finish_reason: FinishReason::Stop,
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        Ok(())
    }
}

pub fn scripted_factory(
    replies: HashMap<Phase, String>,
    counters: PhaseCounters,
) -> ProviderFactory {
    Arc::new(
        move |phase: Phase, _config: &vigil_core::domain::config::LlmConfig| {
            let reply = replies
                .get(&phase)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply for phase '{}'", phase))?;
            Ok(Arc::new(StaticProvider {
                reply,
                phase,
                counters: counters.clone(),
            }) as Arc<dyn LLMProvider>)
        },
    )
}

// ============================================================================
// Canned agent replies
// ============================================================================

pub fn detection_reply_two_problems() -> String {
    serde_json::json!({
        "problems": [
            {
                "id": "p-1",
                "type": "stale_ticket",
                "description": "ticket 4821 has had no response for 12 days",
                "severity": "high",
                "data": {"ticket": 4821}
            },
            {
                "id": "p-2",
                "type": "quota_breach",
                "description": "support queue exceeds SLA backlog threshold",
                "severity": "medium"
            }
        ],
        "confidence": 0.9,
        "summary": "two problems need attention"
    })
    .to_string()
}

pub fn detection_reply_clean() -> String {
    serde_json::json!({
        "problems": [],
        "confidence": 0.95,
        "summary": "all clear"
    })
    .to_string()
}

pub fn analysis_reply() -> String {
    serde_json::json!({
        "root_causes": ["assignee on leave with no fallback rotation"],
        "recommendations": ["escalate to team lead", "notify the customer"],
        "confidence": 0.8,
        "summary": "single root cause identified"
    })
    .to_string()
}

/// A plan with one action per entry in `action_types`, ids a-1, a-2, ...
pub fn planning_reply(action_types: &[&str]) -> String {
    let actions: Vec<serde_json::Value> = action_types
        .iter()
        .enumerate()
        .map(|(i, t)| {
            serde_json::json!({
                "id": format!("a-{}", i + 1),
                "action_type": t,
                "description": format!("run {} remediation", t),
                "target": "ticket-4821",
                "parameters": {},
                "confidence": 0.9,
                "requires_approval": true
            })
        })
        .collect();
    serde_json::json!({
        "plan": {
            "id": "plan-1",
            "actions": actions,
            "estimated_duration": "5m",
            "risk_level": "low",
            "requires_approval": true
        },
        "alternatives": [],
        "confidence": 0.85,
        "summary": "remediation plan ready"
    })
    .to_string()
}

pub fn reporting_reply() -> String {
    serde_json::json!({
        "report": "# Cycle Report\nDetected 2 problems, executed the plan.",
        "metrics": {"problems_detected": 2, "actions_executed": 3, "success_rate": 1.0},
        "recommendations": ["add a fallback rotation"],
        "confidence": 0.8
    })
    .to_string()
}

pub fn learning_reply() -> String {
    serde_json::json!({
        "insights": [
            {
                "id": "i-1",
                "type": "planning",
                "description": "escalation resolves stale tickets reliably",
                "confidence": 0.75
            }
        ],
        "patterns_found": 1,
        "recommendations": ["prefer escalation for stale tickets"],
        "confidence": 0.7,
        "summary": "one reusable pattern observed"
    })
    .to_string()
}

/// Full reply set for a cycle whose plan uses the given action types.
pub fn default_replies(action_types: &[&str]) -> HashMap<Phase, String> {
    HashMap::from([
        (Phase::Detection, detection_reply_two_problems()),
        (Phase::Analysis, analysis_reply()),
        (Phase::Planning, planning_reply(action_types)),
        (Phase::Reporting, reporting_reply()),
        (Phase::Learning, learning_reply()),
    ])
}

// ============================================================================
// Action handlers
// ============================================================================

/// Handler that records how many times it ran and always succeeds.
pub struct RecordingHandler {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    async fn execute(
        &self,
        action: &Action,
        _ctx: &AgentContext,
    ) -> Result<serde_json::Value, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({"handled": action.id}))
    }
}

pub fn recording_registry(types: &[&str]) -> (ActionRegistry, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ActionRegistry::new();
    for t in types {
        registry.register(
            *t,
            Arc::new(RecordingHandler {
                calls: calls.clone(),
            }),
        );
    }
    (registry, calls)
}

// ============================================================================
// Engine construction
// ============================================================================

pub struct TestHarness {
    pub engine: RunEngine,
    pub learning: Arc<InMemoryLearningStore>,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
    pub counters: PhaseCounters,
}

pub fn scripted_engine(replies: HashMap<Phase, String>, actions: ActionRegistry) -> TestHarness {
    let learning = Arc::new(InMemoryLearningStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let counters = phase_counters();
    let engine = RunEngine::with_options(
        Arc::new(InMemoryRunStore::new()),
        learning.clone(),
        checkpoints.clone(),
        actions,
        scripted_factory(replies, counters.clone()),
        AgentInvoker::new(),
    );
    TestHarness {
        engine,
        learning,
        checkpoints,
        counters,
    }
}

// ============================================================================
// Polling helpers
// ============================================================================

pub async fn wait_for_status(engine: &RunEngine, run_id: &str, wanted: RunStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = engine.get_status(run_id).await.unwrap();
        if status.status == wanted {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run '{}' never reached {:?}, last status {:?}",
            run_id,
            wanted,
            status.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_terminal(engine: &RunEngine, run_id: &str) -> RunStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = engine.get_status(run_id).await.unwrap();
        if status.status.is_terminal() {
            return status.status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run '{}' never reached a terminal state, last status {:?}",
            run_id,
            status.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
