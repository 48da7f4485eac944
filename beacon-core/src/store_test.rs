use super::*;
use crate::Instance;

fn hosts(ip: &str) -> Instances {
    Instances::new(vec![Instance::new(ip, 8080)])
}

#[test]
fn test_put_bumps_timestamp_monotonically() {
    let store = DataStore::new();

    let first = store.put("k1", hosts("10.0.0.1"));
    let second = store.put("k1", hosts("10.0.0.2"));

    assert_eq!(first.timestamp, 1);
    assert_eq!(second.timestamp, 2);
    assert_eq!(store.get("k1").unwrap().timestamp, 2);
}

#[test]
fn test_put_recomputes_checksum() {
    let store = DataStore::new();
    let value = hosts("10.0.0.1");
    let expected = value.checksum();

    let datum = store.put("k1", value);

    assert_eq!(datum.checksum, expected);
}

#[test]
fn test_install_rejects_stale_timestamp() {
    let store = DataStore::new();
    store.put("k1", hosts("10.0.0.1"));
    store.put("k1", hosts("10.0.0.2")); // timestamp 2

    let stale = Datum::new("k1", hosts("10.0.0.3"), 2);
    assert!(!store.install(stale));
    assert_eq!(store.get("k1").unwrap().value, hosts("10.0.0.2"));

    let fresh = Datum::new("k1", hosts("10.0.0.3"), 3);
    assert!(store.install(fresh));
    assert_eq!(store.get("k1").unwrap().value, hosts("10.0.0.3"));
}

#[test]
fn test_install_into_empty_store() {
    let store = DataStore::new();
    let datum = Datum::new("k1", hosts("10.0.0.1"), 7);

    assert!(store.install(datum));
    assert_eq!(store.get("k1").unwrap().timestamp, 7);
}

#[test]
fn test_remove_and_contains() {
    let store = DataStore::new();
    store.put("k1", hosts("10.0.0.1"));

    assert!(store.contains("k1"));
    assert!(store.remove("k1").is_some());
    assert!(!store.contains("k1"));
    assert!(store.remove("k1").is_none());
}

#[test]
fn test_keys_is_a_point_in_time_snapshot() {
    let store = DataStore::new();
    store.put("k1", hosts("10.0.0.1"));
    store.put("k2", hosts("10.0.0.2"));

    let keys = store.keys();
    store.remove("k1");

    let mut keys = keys;
    keys.sort();
    assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
    assert_eq!(store.len(), 1);
}
