//! Tests for the agent invocation boundary: transient retry with backoff,
//! the single corrective re-prompt, timeout classification, and fatal
//! short-circuit.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use vigil_core::application::agents::{AgentContext, PhaseAgent};
use vigil_core::application::invocation::{
    AgentError, AgentInvoker, InvocationError, InvocationPolicy,
};
use vigil_core::domain::config::RunConfig;
use vigil_core::domain::phase::{DetectionResult, Phase, PhaseResult, ResultMeta};
use vigil_core::domain::run::{Run, RunId};

#[derive(Clone, Copy)]
enum Step {
    Succeed,
    Transient,
    Invalid,
    Fatal,
    Stall,
}

/// Agent that follows a script of failure modes, one per attempt.
struct ScriptedAgent {
    script: Mutex<Vec<Step>>,
    calls: AtomicUsize,
    saw_correction: AtomicBool,
}

impl ScriptedAgent {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            saw_correction: AtomicBool::new(false),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhaseAgent for ScriptedAgent {
    fn phase(&self) -> Phase {
        Phase::Detection
    }

    async fn run(&self, ctx: &AgentContext) -> Result<PhaseResult, AgentError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if ctx.correction.is_some() {
            self.saw_correction.store(true, Ordering::SeqCst);
        }

        let step = {
            let script = self.script.lock().unwrap();
            *script.get(attempt).unwrap_or(script.last().unwrap())
        };

        match step {
            Step::Succeed => Ok(PhaseResult::Detection(DetectionResult {
                meta: ResultMeta::new(true, "ok", 0.9),
                problems_detected: false,
                problems: vec![],
                summary: "scan finished".into(),
            })),
            Step::Transient => Err(AgentError::Transient("rate limit exceeded".into())),
            Step::Invalid => Err(AgentError::InvalidOutput {
                detail: "missing required field 'problems'".into(),
            }),
            Step::Fatal => Err(AgentError::Fatal("authentication failed".into())),
            Step::Stall => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("stalled attempt should have timed out")
            }
        }
    }
}

fn fast_policy(max_attempts: u32) -> InvocationPolicy {
    InvocationPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_coefficient: 2.0,
        start_to_close: Duration::from_millis(100),
    }
}

fn context() -> AgentContext {
    let run = Run::new(
        RunId::new("run-1").unwrap(),
        "support",
        serde_json::Value::Null,
        RunConfig::default(),
        true,
    );
    AgentContext::for_phase(&run, Phase::Detection, "key".into())
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let agent = ScriptedAgent::new(vec![Step::Transient, Step::Transient, Step::Succeed]);
    let mut ctx = context();

    let result = AgentInvoker::new()
        .invoke(&agent, &mut ctx, &fast_policy(3))
        .await
        .unwrap();

    assert_eq!(result.phase(), Phase::Detection);
    assert_eq!(agent.calls(), 3);
}

#[tokio::test]
async fn test_exhausted_attempts_fail_with_last_error() {
    let agent = ScriptedAgent::new(vec![Step::Transient]);
    let mut ctx = context();

    let err = AgentInvoker::new()
        .invoke(&agent, &mut ctx, &fast_policy(2))
        .await
        .unwrap_err();

    match err {
        InvocationError::Exhausted {
            phase,
            attempts,
            last_error,
        } => {
            assert_eq!(phase, Phase::Detection);
            assert_eq!(attempts, 2);
            assert!(last_error.contains("rate limit"));
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
    assert_eq!(agent.calls(), 2);
}

#[tokio::test]
async fn test_invalid_output_gets_one_corrective_retry() {
    let agent = ScriptedAgent::new(vec![Step::Invalid, Step::Succeed]);
    let mut ctx = context();

    let result = AgentInvoker::new()
        .invoke(&agent, &mut ctx, &fast_policy(3))
        .await;

    assert!(result.is_ok());
    assert_eq!(agent.calls(), 2);
    // The retry attempt carried the validation failure back to the agent.
    assert!(agent.saw_correction.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_second_invalid_output_is_fatal() {
    let agent = ScriptedAgent::new(vec![Step::Invalid, Step::Invalid]);
    let mut ctx = context();

    let err = AgentInvoker::new()
        .invoke(&agent, &mut ctx, &fast_policy(3))
        .await
        .unwrap_err();

    assert!(matches!(err, InvocationError::Fatal { .. }));
    assert_eq!(agent.calls(), 2);
}

#[tokio::test]
async fn test_timeout_counts_as_transient() {
    let agent = ScriptedAgent::new(vec![Step::Stall, Step::Succeed]);
    let mut ctx = context();

    let result = AgentInvoker::new()
        .invoke(&agent, &mut ctx, &fast_policy(2))
        .await;

    assert!(result.is_ok());
    assert_eq!(agent.calls(), 2);
}

#[tokio::test]
async fn test_timeout_exhaustion_reports_start_to_close() {
    let agent = ScriptedAgent::new(vec![Step::Stall]);
    let mut ctx = context();

    let err = AgentInvoker::new()
        .invoke(&agent, &mut ctx, &fast_policy(1))
        .await
        .unwrap_err();

    match err {
        InvocationError::Exhausted { last_error, .. } => {
            assert!(last_error.contains("start-to-close timeout"));
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fatal_error_stops_immediately() {
    let agent = ScriptedAgent::new(vec![Step::Fatal, Step::Succeed]);
    let mut ctx = context();

    let err = AgentInvoker::new()
        .invoke(&agent, &mut ctx, &fast_policy(3))
        .await
        .unwrap_err();

    assert!(matches!(err, InvocationError::Fatal { .. }));
    assert_eq!(agent.calls(), 1);
}

#[tokio::test]
async fn test_concurrency_limit_queues_invocations() {
    use std::sync::Arc;

    // Two stalling agents and a limit of one: the second invocation queues
    // behind the first instead of running concurrently.
    struct GateAgent {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PhaseAgent for GateAgent {
        fn phase(&self) -> Phase {
            Phase::Detection
        }

        async fn run(&self, _ctx: &AgentContext) -> Result<PhaseResult, AgentError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(PhaseResult::Detection(DetectionResult {
                meta: ResultMeta::new(true, "ok", 0.9),
                problems_detected: false,
                problems: vec![],
                summary: "scan finished".into(),
            }))
        }
    }

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let invoker = AgentInvoker::with_concurrency_limit(1);

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let invoker = invoker.clone();
        let agent = GateAgent {
            running: running.clone(),
            peak: peak.clone(),
        };
        tasks.push(tokio::spawn(async move {
            let mut ctx = context();
            invoker
                .invoke(&agent, &mut ctx, &fast_policy(1))
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
}
