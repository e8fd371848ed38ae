//! Infrastructure layer: provider adapters, event bus, and store
//! implementations behind the domain's repository interfaces.

pub mod event_bus;
pub mod json_store;
pub mod learning_store;
pub mod llm;
pub mod repositories;

pub use event_bus::{EventBus, EventReceiver};
pub use json_store::{JsonCheckpointStore, JsonRunStore};
pub use learning_store::{InMemoryLearningStore, JsonlLearningStore};
pub use repositories::{InMemoryCheckpointStore, InMemoryRunStore};
