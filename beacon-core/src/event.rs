//! Cluster-internal naming events.
//!
//! Published fire-and-forget on a broadcast channel; having no subscriber
//! is normal.

use tokio::sync::broadcast;
use tracing::trace;

use crate::Instance;

#[derive(Debug, Clone)]
pub enum NamingEvent {
    /// An ephemeral instance missed its heartbeat window.
    InstanceHeartbeatTimeout {
        namespace_id: String,
        service_name: String,
        instance: Instance,
    },
    /// A service's instance set or health changed.
    ServiceChanged {
        namespace_id: String,
        service_name: String,
    },
}

#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<NamingEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(
        &self,
        event: NamingEvent,
    ) {
        // Err means no live receiver, which is fine.
        if self.tx.send(event).is_err() {
            trace!("naming event dropped: no subscriber");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NamingEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
