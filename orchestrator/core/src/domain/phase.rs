//! Phase Domain Model
//!
//! Defines the six phases of the automation cycle and the typed result
//! payload each phase commits. Results are immutable once written to a Run.
//!
//! # Invariants
//!
//! - A `PhaseResult` variant always matches the phase that produced it
//! - Action ids are unique within a plan and stable across Execution
//! - Confidence scores are clamped to [0.0, 1.0] at construction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Value Objects: Phase
// ============================================================================

/// One phase of the Detection → Analysis → Planning → Execution → Reporting
/// → Learning cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Detection,
    Analysis,
    Planning,
    Execution,
    Reporting,
    Learning,
}

impl Phase {
    /// All phases in cycle order.
    pub const ALL: [Phase; 6] = [
        Phase::Detection,
        Phase::Analysis,
        Phase::Planning,
        Phase::Execution,
        Phase::Reporting,
        Phase::Learning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Detection => "detection",
            Phase::Analysis => "analysis",
            Phase::Planning => "planning",
            Phase::Execution => "execution",
            Phase::Reporting => "reporting",
            Phase::Learning => "learning",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Confidence bucket derived from a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            ConfidenceLevel::VeryHigh
        } else if score >= 0.7 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

// ============================================================================
// Entities: Problems, Actions, Plans
// ============================================================================

/// A problem surfaced by the Detection phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    /// Problem category key (e.g. "stale_ticket", "quota_breach")
    pub kind: String,
    pub description: String,
    /// "low" | "medium" | "high" | "critical"
    pub severity: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// One proposed remediation step within a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    /// Key into the external action-handler registry
    pub action_type: String,
    pub description: String,
    pub target: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub confidence: f64,
    #[serde(default = "default_true")]
    pub requires_approval: bool,
}

fn default_true() -> bool {
    true
}

/// The ordered list of actions produced by Planning, subject to approval.
/// Immutable once Execution starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub estimated_duration: Option<String>,
    /// "low" | "medium" | "high"
    pub risk_level: String,
    #[serde(default = "default_true")]
    pub requires_approval: bool,
}

/// Outcome of executing (or failing to execute) a single action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: String,
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// An insight distilled by the Learning phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInsight {
    pub id: String,
    pub insight_type: String,
    pub description: String,
    pub confidence: f64,
    #[serde(default)]
    pub supporting_runs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Phase Results
// ============================================================================

/// Fields shared by every phase result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMeta {
    pub success: bool,
    pub message: String,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub recorded_at: DateTime<Utc>,
}

impl ResultMeta {
    pub fn new(success: bool, message: impl Into<String>, confidence: f64) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            success,
            message: message.into(),
            confidence,
            confidence_level: ConfidenceLevel::from_score(confidence),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(flatten)]
    pub meta: ResultMeta,
    pub problems_detected: bool,
    pub problems: Vec<Problem>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub meta: ResultMeta,
    pub analyzed_problems: Vec<Problem>,
    pub root_causes: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningResult {
    #[serde(flatten)]
    pub meta: ResultMeta,
    /// None when there was nothing to plan for
    pub plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub alternatives: Vec<ExecutionPlan>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(flatten)]
    pub meta: ResultMeta,
    pub plan_id: String,
    pub outcomes: Vec<ActionOutcome>,
    pub success_count: usize,
    pub failure_count: usize,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingResult {
    #[serde(flatten)]
    pub meta: ResultMeta,
    pub report: String,
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningResult {
    #[serde(flatten)]
    pub meta: ResultMeta,
    pub insights: Vec<LearningInsight>,
    pub patterns_found: usize,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub summary: String,
}

/// Discriminated result payload; the variant always matches the producing
/// phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseResult {
    Detection(DetectionResult),
    Analysis(AnalysisResult),
    Planning(PlanningResult),
    Execution(ExecutionResult),
    Reporting(ReportingResult),
    Learning(LearningResult),
}

impl PhaseResult {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseResult::Detection(_) => Phase::Detection,
            PhaseResult::Analysis(_) => Phase::Analysis,
            PhaseResult::Planning(_) => Phase::Planning,
            PhaseResult::Execution(_) => Phase::Execution,
            PhaseResult::Reporting(_) => Phase::Reporting,
            PhaseResult::Learning(_) => Phase::Learning,
        }
    }

    pub fn meta(&self) -> &ResultMeta {
        match self {
            PhaseResult::Detection(r) => &r.meta,
            PhaseResult::Analysis(r) => &r.meta,
            PhaseResult::Planning(r) => &r.meta,
            PhaseResult::Execution(r) => &r.meta,
            PhaseResult::Reporting(r) => &r.meta,
            PhaseResult::Learning(r) => &r.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_level_buckets() {
        assert_eq!(ConfidenceLevel::from_score(0.95), ConfidenceLevel::VeryHigh);
        assert_eq!(ConfidenceLevel::from_score(0.7), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.5), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.1), ConfidenceLevel::Low);
    }

    #[test]
    fn test_result_meta_clamps_confidence() {
        let meta = ResultMeta::new(true, "ok", 1.7);
        assert_eq!(meta.confidence, 1.0);
        let meta = ResultMeta::new(true, "ok", -0.3);
        assert_eq!(meta.confidence, 0.0);
    }

    #[test]
    fn test_phase_result_discriminant_roundtrip() {
        let result = PhaseResult::Detection(DetectionResult {
            meta: ResultMeta::new(true, "found 1 problem", 0.8),
            problems_detected: true,
            problems: vec![Problem {
                id: "p-1".into(),
                kind: "stale_ticket".into(),
                description: "ticket idle for 12 days".into(),
                severity: "high".into(),
                data: serde_json::Value::Null,
            }],
            summary: "one stale ticket".into(),
        });

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["phase"], "detection");

        let back: PhaseResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.phase(), Phase::Detection);
    }
}
