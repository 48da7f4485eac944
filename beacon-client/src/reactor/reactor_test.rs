use std::collections::HashMap as StdHashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering as AtomicOrdering;

use async_trait::async_trait;
use parking_lot::Mutex as PlMutex;
use tempfile::tempdir;
use tokio::time::sleep;
use tracing_test::traced_test;

use beacon_core::ClientBeat;
use beacon_core::Result;

use super::*;
use crate::api::BeatResult;
use crate::failover::FAILOVER_SWITCH_FILE;

/// Scripted server answers per service name, with an optional response
/// delay to exercise the first-fetch rendezvous.
#[derive(Default)]
struct ScriptedApi {
    responses: PlMutex<StdHashMap<String, String>>,
    delay_ms: AtomicU64,
    query_calls: AtomicU64,
}

impl ScriptedApi {
    fn set_response(
        &self,
        service_name: &str,
        json: String,
    ) {
        self.responses.lock().insert(service_name.to_string(), json);
    }
}

#[async_trait]
impl NamingApi for ScriptedApi {
    async fn query_list(
        &self,
        service_name: &str,
        _clusters: &str,
        _udp_port: u16,
        _healthy_only: bool,
    ) -> Result<String> {
        self.query_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let delay = self.delay_ms.load(AtomicOrdering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        Ok(self
            .responses
            .lock()
            .get(service_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn register_instance(
        &self,
        _service_name: &str,
        _instance: Instance,
    ) -> Result<()> {
        Ok(())
    }

    async fn deregister_instance(
        &self,
        _service_name: &str,
        _instance: Instance,
    ) -> Result<()> {
        Ok(())
    }

    async fn send_beat(
        &self,
        _beat: ClientBeat,
        _lightweight: bool,
    ) -> Result<BeatResult> {
        Ok(BeatResult::default())
    }

    async fn server_healthy(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct CountingListener {
    events: PlMutex<Vec<InstancesChangeEvent>>,
}

impl EventListener for CountingListener {
    fn on_event(
        &self,
        event: &InstancesChangeEvent,
    ) {
        self.events.lock().push(event.clone());
    }
}

fn service_json(
    name: &str,
    clusters: &str,
    last_ref_time: u64,
    ips: &[&str],
) -> String {
    let mut info = ServiceInfo::new(name, clusters);
    info.last_ref_time = last_ref_time;
    info.cache_millis = 1_000;
    for ip in ips {
        info.hosts.push(Instance::new(*ip, 8080));
    }
    serde_json::to_string(&info).unwrap()
}

async fn reactor_with(
    api: Arc<ScriptedApi>,
    mutate: impl FnOnce(&mut ClientConfig),
) -> (HostReactor, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let mut config = ClientConfig {
        cache_dir: dir.path().to_path_buf(),
        ..ClientConfig::default()
    };
    mutate(&mut config);
    let reactor = HostReactor::new(api, config).await.unwrap();
    (reactor, dir)
}

#[tokio::test(start_paused = true)]
async fn test_first_fetch_populates_cache_and_disk() {
    let api = Arc::new(ScriptedApi::default());
    api.set_response("g@@svc", service_json("g@@svc", "", 1, &["10.0.0.1"]));
    let (reactor, dir) = reactor_with(api.clone(), |_| {}).await;

    let info = reactor.get_service_info("g@@svc", "").await.unwrap();

    assert_eq!(info.hosts.len(), 1);
    assert_eq!(api.query_calls.load(AtomicOrdering::SeqCst), 1);

    let cached = crate::cache::read(&dir.path().join("public"));
    assert!(cached.contains_key("g@@svc"), "view persisted on change");

    reactor.shutdown();
}

/// Two concurrent first fetches: one query, one event, both callers see
/// the answer.
#[tokio::test(start_paused = true)]
async fn test_first_fetch_rendezvous() {
    let api = Arc::new(ScriptedApi::default());
    api.set_response("g@@svc", service_json("g@@svc", "", 1, &["10.0.0.1"]));
    api.delay_ms.store(200, AtomicOrdering::SeqCst);
    let (reactor, _dir) = reactor_with(api.clone(), |_| {}).await;
    let reactor = Arc::new(reactor);

    let listener = Arc::new(CountingListener::default());
    reactor
        .notifier
        .register_listener("g@@svc", "", listener.clone());

    let first = {
        let reactor = reactor.clone();
        tokio::spawn(async move { reactor.get_service_info("g@@svc", "").await.unwrap() })
    };
    sleep(Duration::from_millis(10)).await;
    let second = {
        let reactor = reactor.clone();
        tokio::spawn(async move { reactor.get_service_info("g@@svc", "").await.unwrap() })
    };

    let first = first.await.unwrap();
    let second = second.await.unwrap();

    assert_eq!(first.hosts.len(), 1);
    assert_eq!(second.hosts.len(), 1, "waiter observed the fetched view");
    assert_eq!(api.query_calls.load(AtomicOrdering::SeqCst), 1, "one fetch for both");

    sleep(Duration::from_millis(50)).await;
    assert_eq!(listener.events.lock().len(), 1, "exactly one change event");

    reactor.shutdown();
}

/// Reordered host lists with identical (ip, port) content are not a
/// change.
#[tokio::test(start_paused = true)]
async fn test_diff_is_stable_under_host_order() {
    let api = Arc::new(ScriptedApi::default());
    let (reactor, _dir) = reactor_with(api, |_| {}).await;

    let listener = Arc::new(CountingListener::default());
    reactor
        .notifier
        .register_listener("g@@svc", "", listener.clone());

    reactor
        .process_service_json(&service_json("g@@svc", "", 1, &["10.0.0.1", "10.0.0.2"]))
        .unwrap();
    reactor
        .process_service_json(&service_json("g@@svc", "", 2, &["10.0.0.2", "10.0.0.1"]))
        .unwrap();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(listener.events.lock().len(), 1, "only the initial view is a change");

    reactor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_diff_classifies_added_removed_modified() {
    let api = Arc::new(ScriptedApi::default());
    let (reactor, _dir) = reactor_with(api, |_| {}).await;

    let listener = Arc::new(CountingListener::default());
    reactor
        .notifier
        .register_listener("g@@svc", "", listener.clone());

    reactor
        .process_service_json(&service_json("g@@svc", "", 1, &["10.0.0.1", "10.0.0.2"]))
        .unwrap();

    // 10.0.0.2 leaves, 10.0.0.3 arrives, 10.0.0.1 changes weight.
    let mut info = ServiceInfo::new("g@@svc", "");
    info.last_ref_time = 2;
    let mut modified = Instance::new("10.0.0.1", 8080);
    modified.weight = 9.0;
    info.hosts.push(modified);
    info.hosts.push(Instance::new("10.0.0.3", 8080));
    reactor
        .process_service_json(&serde_json::to_string(&info).unwrap())
        .unwrap();

    sleep(Duration::from_millis(50)).await;
    let events = listener.events.lock().clone();
    assert_eq!(events.len(), 2);
    let hosts: Vec<String> = events[1].hosts.iter().map(|h| h.to_inet_addr()).collect();
    assert!(hosts.contains(&"10.0.0.1:8080".to_string()));
    assert!(hosts.contains(&"10.0.0.3:8080".to_string()));
    assert!(!hosts.contains(&"10.0.0.2:8080".to_string()));

    reactor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_push_empty_protection_keeps_the_cached_view() {
    let api = Arc::new(ScriptedApi::default());
    let (reactor, _dir) = reactor_with(api, |c| c.push_empty_protection = true).await;

    reactor
        .process_service_json(&service_json("g@@svc", "", 1, &["10.0.0.1"]))
        .unwrap();
    let returned = reactor
        .process_service_json(&service_json("g@@svc", "", 2, &[]))
        .unwrap();

    assert_eq!(returned.hosts.len(), 1, "empty push ignored");
    assert_eq!(reactor.cached_view("g@@svc", "").unwrap().hosts.len(), 1);

    reactor.shutdown();
}

#[traced_test]
#[tokio::test(start_paused = true)]
async fn test_out_of_date_payload_is_kept_with_a_warning() {
    let api = Arc::new(ScriptedApi::default());
    let (reactor, _dir) = reactor_with(api, |_| {}).await;

    reactor
        .process_service_json(&service_json("g@@svc", "", 10, &["10.0.0.1"]))
        .unwrap();
    reactor
        .process_service_json(&service_json("g@@svc", "", 5, &["10.0.0.2"]))
        .unwrap();

    // The server is authoritative inside its session: the regressed
    // payload still lands.
    let cached = reactor.cached_view("g@@svc", "").unwrap();
    assert_eq!(cached.last_ref_time, 5);
    assert_eq!(cached.hosts[0].ip, "10.0.0.2");
    assert!(logs_contain("out of date data received"));

    reactor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_modified_ephemeral_host_refreshes_its_beat() {
    let api = Arc::new(ScriptedApi::default());
    let (reactor, _dir) = reactor_with(api, |_| {}).await;

    reactor
        .process_service_json(&service_json("g@@svc", "", 1, &["10.0.0.1"]))
        .unwrap();

    let instance = Instance::new("10.0.0.1", 8080);
    reactor
        .beat_reactor()
        .add_beat_info(BeatReactor::build_beat_info("g@@svc", &instance));
    assert_eq!(reactor.beat_reactor().beat_count(), 1);

    let mut info = ServiceInfo::new("g@@svc", "");
    info.last_ref_time = 2;
    let mut modified = Instance::new("10.0.0.1", 8080);
    modified.weight = 4.0;
    info.hosts.push(modified);
    reactor
        .process_service_json(&serde_json::to_string(&info).unwrap())
        .unwrap();

    // Still exactly one beat record, rebuilt from the modified host.
    assert_eq!(reactor.beat_reactor().beat_count(), 1);
    assert!(reactor.beat_reactor().has_beat("g@@svc", "10.0.0.1", 8080));

    reactor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_failover_switch_routes_reads_to_the_snapshot() {
    let api = Arc::new(ScriptedApi::default());
    api.set_response("g@@svc", service_json("g@@svc", "", 1, &["10.0.0.1"]));
    let (reactor, dir) = reactor_with(api, |_| {}).await;

    let failover_dir = dir.path().join("public").join("failover");
    std::fs::create_dir_all(&failover_dir).unwrap();
    let mut snapshot = ServiceInfo::new("g@@svc", "");
    snapshot.hosts.push(Instance::new("10.9.9.9", 9999));
    crate::cache::write(&snapshot, &failover_dir).unwrap();
    std::fs::write(failover_dir.join(FAILOVER_SWITCH_FILE), "1").unwrap();

    // Let the switch refresher tick.
    sleep(Duration::from_millis(6_000)).await;

    let info = reactor.get_service_info("g@@svc", "").await.unwrap();
    assert_eq!(info.hosts.len(), 1);
    assert_eq!(info.hosts[0].ip, "10.9.9.9");

    reactor.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_the_task_and_evicts_the_view() {
    let api = Arc::new(ScriptedApi::default());
    api.set_response("g@@svc", service_json("g@@svc", "", 1, &["10.0.0.1"]));
    let (reactor, _dir) = reactor_with(api, |_| {}).await;

    let listener: Arc<dyn EventListener> = Arc::new(CountingListener::default());
    reactor.subscribe("g@@svc", "", listener.clone()).await.unwrap();
    assert!(reactor.cached_view("g@@svc", "").is_some());
    assert_eq!(reactor.subscribed_keys(), vec!["g@@svc".to_string()]);

    reactor.unsubscribe("g@@svc", "", &listener);
    assert!(reactor.subscribed_keys().is_empty());

    // The update task notices on its next tick and evicts the entry.
    sleep(Duration::from_millis(3_000)).await;
    assert!(reactor.cached_view("g@@svc", "").is_none());

    reactor.shutdown();
}
