//! Broadcast-based observability sink.
//!
//! Subscribers (alert pipelines, dashboards, tests) attach via
//! [`EventPublisher::subscribe`]. Publishing with no subscribers is not an
//! error: the governor's own tracing output is the floor of observability,
//! the channel is the integration point.

use super::{GovernorEvent, Severity};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<GovernorEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers and mirror it to the tracing stream.
    pub fn publish(&self, event: GovernorEvent) {
        match event.severity {
            Severity::Info => tracing::info!(
                event = %event.event,
                connections_terminated = event.connections_terminated,
                execution_time_ms = event.execution_time_ms,
                remaining_capacity_ratio = event.remaining_capacity_ratio,
                timestamp = %event.timestamp.to_rfc3339(),
                "📡 governor event"
            ),
            Severity::Warning => tracing::warn!(
                event = %event.event,
                connections_terminated = event.connections_terminated,
                execution_time_ms = event.execution_time_ms,
                remaining_capacity_ratio = event.remaining_capacity_ratio,
                timestamp = %event.timestamp.to_rfc3339(),
                "📡 governor event"
            ),
            Severity::Page => tracing::error!(
                event = %event.event,
                connections_terminated = event.connections_terminated,
                execution_time_ms = event.execution_time_ms,
                remaining_capacity_ratio = event.remaining_capacity_ratio,
                timestamp = %event.timestamp.to_rfc3339(),
                "🚨 governor event"
            ),
        }

        // A send error only means no subscribers are listening right now.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
