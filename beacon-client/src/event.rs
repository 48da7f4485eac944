//! Instance-change events and their subscriber registry.
//!
//! The reactor publishes on a broadcast channel; a dispatcher task
//! forwards matching events to the listeners registered for each
//! (service, clusters) view. Events are scoped by the owning reactor's
//! id so several reactors in one process do not crosstalk.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tracing::debug;
use tracing::trace;

use beacon_core::Instance;
use beacon_core::ServiceInfo;

#[derive(Debug, Clone)]
pub struct InstancesChangeEvent {
    /// Id of the reactor that observed the change.
    pub scope: String,
    pub service_name: String,
    pub group_name: String,
    pub clusters: String,
    pub hosts: Vec<Instance>,
}

pub trait EventListener: Send + Sync {
    fn on_event(
        &self,
        event: &InstancesChangeEvent,
    );
}

/// Scope-filtered fan-out of [`InstancesChangeEvent`]s to registered
/// listeners, keyed by the subscribed (service, clusters) view.
pub struct InstancesChangeNotifier {
    scope: String,
    listeners: DashMap<String, Vec<Arc<dyn EventListener>>>,
}

impl InstancesChangeNotifier {
    pub fn new(scope: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            scope: scope.into(),
            listeners: DashMap::new(),
        })
    }

    /// Forwards broadcast events to listeners until the channel or the
    /// shutdown signal closes.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<InstancesChangeEvent>,
        mut shutdown: watch::Receiver<()>,
    ) {
        let notifier = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => match event {
                        Ok(event) => notifier.dispatch(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "event dispatcher lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    pub fn register_listener(
        &self,
        service_name: &str,
        clusters: &str,
        listener: Arc<dyn EventListener>,
    ) {
        let key = ServiceInfo::build_key(service_name, clusters);
        self.listeners.entry(key).or_default().push(listener);
    }

    pub fn deregister_listener(
        &self,
        service_name: &str,
        clusters: &str,
        listener: &Arc<dyn EventListener>,
    ) {
        let key = ServiceInfo::build_key(service_name, clusters);
        if let Some(mut entry) = self.listeners.get_mut(&key) {
            if let Some(pos) = entry.iter().position(|l| Arc::ptr_eq(l, listener)) {
                entry.remove(pos);
            }
        }
    }

    pub fn is_subscribed(
        &self,
        service_name: &str,
        clusters: &str,
    ) -> bool {
        let key = ServiceInfo::build_key(service_name, clusters);
        self.listeners.get(&key).is_some_and(|l| !l.is_empty())
    }

    /// The (service, clusters) views with at least one listener.
    pub fn subscribed_keys(&self) -> Vec<String> {
        self.listeners
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    fn dispatch(
        &self,
        event: &InstancesChangeEvent,
    ) {
        if event.scope != self.scope {
            trace!(scope = %event.scope, "event from another reactor ignored");
            return;
        }
        let key = ServiceInfo::build_key(&event.service_name, &event.clusters);
        let Some(snapshot) = self.listeners.get(&key).map(|l| l.clone()) else {
            return;
        };
        for listener in snapshot {
            listener.on_event(event);
        }
    }
}
