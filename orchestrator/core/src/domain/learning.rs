//! Learning Store Domain Model
//!
//! One immutable record is appended per completed run, keyed for retrieval
//! by domain and by pattern signature (problem-type + action-type). The
//! Learning phase reads historical records before producing new insights.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::phase::{DetectionResult, ExecutionPlan, ExecutionResult};
use crate::domain::run::RunId;

/// One action taken during a run, reduced to the fields learning cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTaken {
    pub action_type: String,
    pub target: String,
    pub success: bool,
}

/// Planned confidence paired with the observed outcome, used to calibrate
/// future planning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceOutcome {
    pub confidence: f64,
    pub success: bool,
}

/// Immutable summary of one run, appended after the cycle finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    pub run_id: RunId,
    pub domain: String,
    pub recorded_at: DateTime<Utc>,
    pub problem_types: Vec<String>,
    pub actions: Vec<ActionTaken>,
    pub confidence_outcomes: Vec<ConfidenceOutcome>,
    pub insights: Vec<String>,
    pub overall_success: bool,
}

impl LearningRecord {
    /// Gather a record from the phase results a finished cycle produced.
    pub fn gather(
        run_id: RunId,
        domain: impl Into<String>,
        detection: Option<&DetectionResult>,
        plan: Option<&ExecutionPlan>,
        execution: Option<&ExecutionResult>,
    ) -> Self {
        let problem_types = detection
            .map(|d| d.problems.iter().map(|p| p.kind.clone()).collect())
            .unwrap_or_default();

        let mut actions = Vec::new();
        let mut confidence_outcomes = Vec::new();
        if let (Some(plan), Some(execution)) = (plan, execution) {
            for action in &plan.actions {
                let outcome = execution
                    .outcomes
                    .iter()
                    .find(|o| o.action_id == action.id);
                let success = outcome.map(|o| o.success).unwrap_or(false);
                actions.push(ActionTaken {
                    action_type: action.action_type.clone(),
                    target: action.target.clone(),
                    success,
                });
                confidence_outcomes.push(ConfidenceOutcome {
                    confidence: action.confidence,
                    success,
                });
            }
        }

        let overall_success = execution
            .map(|e| e.meta.success && e.failure_count == 0)
            .unwrap_or(true);

        Self {
            run_id,
            domain: domain.into(),
            recorded_at: Utc::now(),
            problem_types,
            actions,
            confidence_outcomes,
            insights: Vec::new(),
            overall_success,
        }
    }

    /// Pattern signatures for retrieval: every observed problem-type /
    /// action-type combination.
    pub fn pattern_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for problem in &self.problem_types {
            for action in &self.actions {
                let key = format!("{}:{}", problem, action.action_type);
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

/// Filter for querying historical records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningQuery {
    /// Restrict to one domain tag.
    pub domain: Option<String>,
    /// Restrict to records carrying this pattern signature.
    pub pattern: Option<String>,
    /// Most-recent-first cap on returned records.
    pub limit: Option<usize>,
}

impl LearningQuery {
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            pattern: None,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &LearningRecord) -> bool {
        if let Some(domain) = &self.domain {
            if &record.domain != domain {
                return false;
            }
        }
        if let Some(pattern) = &self.pattern {
            if !record.pattern_keys().iter().any(|k| k == pattern) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(String),

    #[error("storage serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Append-only store of learning records. Appends must never fail silently
/// and must not interleave under concurrent writers.
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn append(&self, record: &LearningRecord) -> Result<(), StorageError>;

    /// Records matching the filter, most recent first.
    async fn query(&self, filter: &LearningQuery) -> Result<Vec<LearningRecord>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(domain: &str, problems: &[&str], actions: &[(&str, bool)]) -> LearningRecord {
        LearningRecord {
            run_id: RunId::new("run-x").unwrap(),
            domain: domain.into(),
            recorded_at: Utc::now(),
            problem_types: problems.iter().map(|s| s.to_string()).collect(),
            actions: actions
                .iter()
                .map(|(t, ok)| ActionTaken {
                    action_type: t.to_string(),
                    target: "t".into(),
                    success: *ok,
                })
                .collect(),
            confidence_outcomes: vec![],
            insights: vec![],
            overall_success: true,
        }
    }

    #[test]
    fn test_pattern_keys_cross_product() {
        let r = record(
            "support",
            &["stale_ticket", "quota_breach"],
            &[("escalate", true), ("notify", true)],
        );
        let keys = r.pattern_keys();
        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&"stale_ticket:escalate".to_string()));
        assert!(keys.contains(&"quota_breach:notify".to_string()));
    }

    #[test]
    fn test_query_filters() {
        let r = record("support", &["stale_ticket"], &[("escalate", true)]);

        assert!(LearningQuery::for_domain("support").matches(&r));
        assert!(!LearningQuery::for_domain("billing").matches(&r));

        let by_pattern = LearningQuery {
            domain: None,
            pattern: Some("stale_ticket:escalate".into()),
            limit: None,
        };
        assert!(by_pattern.matches(&r));

        let miss = LearningQuery {
            domain: None,
            pattern: Some("stale_ticket:close".into()),
            limit: None,
        };
        assert!(!miss.matches(&r));
    }
}
