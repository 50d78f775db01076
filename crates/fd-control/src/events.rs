//! Fleet event fan-out

use tokio::sync::broadcast;

use fd_core::model::FleetEvent;

/// Broadcast channel carrying fleet events to the alert dispatcher
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn publish(&self, event: FleetEvent) {
        tracing::debug!(
            kind = %event.kind,
            severity = %event.severity,
            signature = %event.signature,
            "Publishing fleet event"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
