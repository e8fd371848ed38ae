// Event Bus - Pub/Sub for Run Events
//
// In-memory event streaming over tokio broadcast channels, consumed by
// presentation layers (CLI poll fallback, SSE, dashboards). The stream is
// lossy under lag; the run read model is the authoritative surface.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::RunEvent;
use crate::domain::run::RunId;

/// Event bus for publishing and subscribing to run events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a new event bus; `capacity` bounds how many events are
    /// buffered per subscriber before old ones drop.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Event bus with the default capacity (1000).
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RunEvent) {
        debug!(?event, "publishing run event");
        if self.sender.send(event).is_err() {
            // No subscribers; events are advisory.
        }
    }

    /// Subscribe to all run events.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe filtered to a single run.
    pub fn subscribe_run(&self, run_id: RunId) -> RunEventReceiver {
        RunEventReceiver {
            receiver: self.sender.subscribe(),
            run_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus closed")]
    Closed,

    #[error("no event available")]
    Empty,

    #[error("receiver lagged by {0} events")]
    Lagged(u64),
}

/// Receiver for all run events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<RunEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available).
    pub async fn recv(&mut self) -> Result<RunEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<RunEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => EventBusError::Lagged(n),
        })
    }
}

/// Receiver filtered to one run's events.
pub struct RunEventReceiver {
    receiver: broadcast::Receiver<RunEvent>,
    run_id: RunId,
}

impl RunEventReceiver {
    pub async fn recv(&mut self) -> Result<RunEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => EventBusError::Lagged(n),
            })?;
            if event.run_id() == &self.run_id {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::with_default_capacity();
        let mut receiver = bus.subscribe();

        let run_id = RunId::new("run-1").unwrap();
        bus.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            domain: "support".into(),
            started_at: Utc::now(),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.run_id(), &run_id);
    }

    #[tokio::test]
    async fn test_run_filtered_receiver() {
        let bus = EventBus::with_default_capacity();
        let target = RunId::new("run-2").unwrap();
        let mut receiver = bus.subscribe_run(target.clone());

        bus.publish(RunEvent::RunCancelled {
            run_id: RunId::new("run-1").unwrap(),
        });
        bus.publish(RunEvent::RunCancelled {
            run_id: target.clone(),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.run_id(), &target);
    }
}
