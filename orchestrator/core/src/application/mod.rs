//! Application layer: the run engine, the agent invocation boundary, the
//! dispatch registry, and the phase agents.

pub mod agents;
pub mod dispatch;
pub mod engine;
pub mod invocation;

pub use dispatch::{ActionError, ActionHandler, ActionRegistry, ProviderFactory};
pub use engine::{EngineError, RunEngine, StartRun};
pub use invocation::{idempotency_key, AgentError, AgentInvoker, InvocationError, InvocationPolicy};
