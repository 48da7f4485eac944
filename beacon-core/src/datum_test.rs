use std::collections::HashMap;

use super::*;
use crate::key::build_ephemeral_instance_list_key;
use crate::Instance;

fn sample_datum() -> Datum {
    let key = build_ephemeral_instance_list_key("public", "g@@svc");
    let instances = Instances::new(vec![Instance::new("10.0.0.1", 8080)]);
    Datum::new(key, instances, 3)
}

#[test]
fn test_datum_checksum_matches_value() {
    let datum = sample_datum();
    assert_eq!(datum.checksum, datum.value.checksum());
    assert_eq!(datum.timestamp, 3);
}

/// Checksum determinism across independently constructed datums of equal
/// logical content.
#[test]
fn test_independent_datums_agree_on_checksum() {
    assert_eq!(sample_datum().checksum, sample_datum().checksum);
}

#[test]
fn test_datum_map_round_trip() {
    let datum = sample_datum();
    let mut map = HashMap::new();
    map.insert(datum.key.clone(), datum.clone());

    let body = serialize_datum_map(&map).unwrap();
    let parsed = deserialize_datum_map(&body).unwrap();

    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed.get(&datum.key), Some(&datum));
}

#[test]
fn test_empty_body_deserializes_to_empty_map() {
    assert!(deserialize_datum_map(b"").unwrap().is_empty());
}

#[test]
fn test_malformed_body_is_an_error() {
    assert!(deserialize_datum_map(b"{not json").is_err());
    assert!(deserialize_checksum_map(b"[1,2,3]").is_err());
}

#[test]
fn test_checksum_map_round_trip() {
    let mut map = HashMap::new();
    map.insert("k1".to_string(), "abc".to_string());
    map.insert("k2".to_string(), "def".to_string());

    let body = serialize_checksum_map(&map).unwrap();
    assert_eq!(deserialize_checksum_map(&body).unwrap(), map);
}
