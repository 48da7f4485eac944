use std::collections::HashMap;
use std::sync::atomic::AtomicU16;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use serde_json::Value;
use tempfile::tempdir;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::time::timeout;

use beacon_core::ClientBeat;
use beacon_core::Instance;
use beacon_core::Result;
use beacon_core::ServiceInfo;

use crate::push_receiver::PushReceiver;

use crate::api::BeatResult;
use crate::api::NamingApi;
use crate::beat::BeatReactor;
use crate::config::ClientConfig;
use crate::reactor::ReactorCore;

struct SilentApi;

#[async_trait]
impl NamingApi for SilentApi {
    async fn query_list(
        &self,
        _service_name: &str,
        _clusters: &str,
        _udp_port: u16,
        _healthy_only: bool,
    ) -> Result<String> {
        Ok(String::new())
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

struct Fixture {
    core: Arc<ReactorCore>,
    receiver: PushReceiver,
    _shutdown: watch::Sender<()>,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let api = Arc::new(SilentApi);
    let (event_tx, _event_rx) = broadcast::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let config = ClientConfig {
        cache_dir: dir.path().to_path_buf(),
        ..ClientConfig::default()
    };
    let cache_dir = config.namespace_cache_dir();
    let core = Arc::new(ReactorCore {
        config,
        api: api.clone(),
        service_info_map: Arc::new(DashMap::new()),
        updating: DashMap::new(),
        beats: Arc::new(BeatReactor::new(api, shutdown_rx.clone())),
        event_scope: "push-test".to_string(),
        event_tx,
        push_port: AtomicU16::new(0),
        cache_dir,
    });
    let receiver = PushReceiver::spawn(core.clone(), shutdown_rx).await.unwrap();
    Fixture {
        core,
        receiver,
        _shutdown: shutdown_tx,
        _dir: dir,
    }
}

fn service_payload() -> String {
    let mut info = ServiceInfo::new("g@@svc", "");
    info.last_ref_time = 42;
    info.hosts.push(Instance::new("10.0.0.1", 8080));
    serde_json::to_string(&info).unwrap()
}

async fn exchange(
    fixture: &Fixture,
    frame: &str,
) -> Option<Value> {
    let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    client
        .send_to(frame.as_bytes(), ("127.0.0.1", fixture.receiver.port()))
        .await
        .unwrap();

    let mut buf = vec![0u8; 64 * 1024];
    match timeout(Duration::from_secs(2), client.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => serde_json::from_slice(&buf[..len]).ok(),
        _ => None,
    }
}

#[tokio::test]
async fn test_dom_frame_updates_the_cache_and_acks() {
    let f = fixture().await;
    assert!(f.receiver.port() > 0);
    assert_eq!(f.core.push_port(), f.receiver.port());

    let frame = json!({
        "type": "dom",
        "data": service_payload(),
        "lastRefTime": 42,
    })
    .to_string();

    let ack = exchange(&f, &frame).await.expect("ack expected");
    assert_eq!(ack["type"], "push-ack");
    assert_eq!(ack["lastRefTime"], 42);

    let view = f.core.service_info_map.get("g@@svc").expect("view installed");
    assert_eq!(view.hosts.len(), 1);
    assert_eq!(view.last_ref_time, 42);
}

#[tokio::test]
async fn test_dump_frame_acks_with_the_cache_contents() {
    let f = fixture().await;
    f.core.process_service_json(&service_payload()).unwrap();

    let frame = json!({"type": "dump", "lastRefTime": 7}).to_string();
    let ack = exchange(&f, &frame).await.expect("ack expected");

    assert_eq!(ack["type"], "push-ack");
    assert_eq!(ack["lastRefTime"], 7);
    let dumped: HashMap<String, ServiceInfo> =
        serde_json::from_str(ack["data"].as_str().unwrap()).unwrap();
    assert!(dumped.contains_key("g@@svc"));
}

#[tokio::test]
async fn test_undecodable_frame_is_dropped_without_ack() {
    let f = fixture().await;

    let ack = exchange(&f, "definitely not json").await;
    assert!(ack.is_none());
    assert!(f.core.service_info_map.is_empty());
}

#[tokio::test]
async fn test_unknown_frame_type_still_acks() {
    let f = fixture().await;

    let frame = json!({"type": "mystery", "lastRefTime": 3}).to_string();
    let ack = exchange(&f, &frame).await.expect("ack expected");
    assert_eq!(ack["lastRefTime"], 3);
    assert_eq!(ack["data"], "");
}
