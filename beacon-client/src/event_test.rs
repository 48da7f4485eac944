use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;

use super::*;

#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<InstancesChangeEvent>>,
}

impl EventListener for Recording {
    fn on_event(
        &self,
        event: &InstancesChangeEvent,
    ) {
        self.seen.lock().push(event.clone());
    }
}

fn event(
    scope: &str,
    service: &str,
    clusters: &str,
) -> InstancesChangeEvent {
    InstancesChangeEvent {
        scope: scope.to_string(),
        service_name: service.to_string(),
        group_name: "g".to_string(),
        clusters: clusters.to_string(),
        hosts: Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_reaches_matching_listeners_only() {
    let (tx, rx) = tokio::sync::broadcast::channel(16);
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());

    let notifier = InstancesChangeNotifier::new("scope-1");
    notifier.spawn_dispatcher(rx, shutdown_rx);

    let subscribed = Arc::new(Recording::default());
    let other_view = Arc::new(Recording::default());
    notifier.register_listener("g@@svc", "", subscribed.clone());
    notifier.register_listener("g@@svc", "c1", other_view.clone());

    tx.send(event("scope-1", "g@@svc", "")).unwrap();
    // Wrong scope: filtered.
    tx.send(event("scope-2", "g@@svc", "")).unwrap();

    sleep(Duration::from_millis(50)).await;

    assert_eq!(subscribed.seen.lock().len(), 1);
    assert!(other_view.seen.lock().is_empty());
}

#[tokio::test]
async fn test_subscription_bookkeeping() {
    let notifier = InstancesChangeNotifier::new("scope-1");
    let listener = Arc::new(Recording::default());

    assert!(!notifier.is_subscribed("g@@svc", ""));

    notifier.register_listener("g@@svc", "", listener.clone());
    assert!(notifier.is_subscribed("g@@svc", ""));
    assert_eq!(notifier.subscribed_keys(), vec!["g@@svc".to_string()]);

    let erased: Arc<dyn EventListener> = listener;
    notifier.deregister_listener("g@@svc", "", &erased);
    assert!(!notifier.is_subscribed("g@@svc", ""));
}
