use dashmap::DashMap;
use tempfile::tempdir;

use beacon_core::Instance;
use beacon_core::ServiceInfo;

use crate::cache;
use crate::failover::FailoverReactor;
use crate::failover::FAILOVER_SWITCH_FILE;

fn view(
    name: &str,
    ip: &str,
) -> ServiceInfo {
    let mut info = ServiceInfo::new(name, "");
    info.hosts.push(Instance::new(ip, 8080));
    info
}

#[test]
fn test_switch_follows_the_file_and_loads_lazily() {
    let dir = tempdir().unwrap();
    let failover_dir = dir.path().to_path_buf();
    cache::write(&view("g@@svc", "10.0.0.9"), &failover_dir).unwrap();

    let reactor = FailoverReactor::new(failover_dir.clone());
    assert!(!reactor.is_failover_switch());
    assert!(reactor.service_map.is_empty(), "snapshot loads lazily");

    std::fs::write(failover_dir.join(FAILOVER_SWITCH_FILE), "1").unwrap();
    reactor.refresh_switch();

    assert!(reactor.is_failover_switch());
    let info = reactor.get_service("g@@svc");
    assert_eq!(info.hosts.len(), 1);
    assert_eq!(info.hosts[0].ip, "10.0.0.9");

    std::fs::write(failover_dir.join(FAILOVER_SWITCH_FILE), "0").unwrap();
    reactor.refresh_switch();
    assert!(!reactor.is_failover_switch());
}

#[test]
fn test_missing_switch_file_means_off() {
    let dir = tempdir().unwrap();
    let reactor = FailoverReactor::new(dir.path().to_path_buf());

    reactor.refresh_switch();
    assert!(!reactor.is_failover_switch());
}

#[test]
fn test_unknown_key_yields_an_empty_view() {
    let dir = tempdir().unwrap();
    let reactor = FailoverReactor::new(dir.path().to_path_buf());

    let info = reactor.get_service("g@@missing@@c1");
    assert_eq!(info.name, "g@@missing");
    assert_eq!(info.clusters, "c1");
    assert!(info.hosts.is_empty());
}

#[test]
fn test_dump_skips_empty_views() {
    let dir = tempdir().unwrap();
    let reactor = FailoverReactor::new(dir.path().to_path_buf());

    let map = DashMap::new();
    map.insert("g@@full".to_string(), view("g@@full", "10.0.0.1"));
    map.insert("g@@empty".to_string(), ServiceInfo::new("g@@empty", ""));
    reactor.dump(&map);

    let views = cache::read(dir.path());
    assert_eq!(views.len(), 1);
    assert!(views.contains_key("g@@full"));
}
