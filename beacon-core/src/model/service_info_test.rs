use super::*;

#[test]
fn test_key_with_and_without_clusters() {
    assert_eq!(ServiceInfo::build_key("g@@svc", ""), "g@@svc");
    assert_eq!(ServiceInfo::build_key("g@@svc", "c1,c2"), "g@@svc@@c1,c2");
}

#[test]
fn test_parse_key_inverts_build_key() {
    let (name, clusters) = ServiceInfo::parse_key("g@@svc@@c1,c2");
    assert_eq!(name, "g@@svc");
    assert_eq!(clusters, "c1,c2");

    let (name, clusters) = ServiceInfo::parse_key("g@@svc");
    assert_eq!(name, "g@@svc");
    assert_eq!(clusters, "");
}

#[test]
fn test_validate_rejects_empty_and_malformed_views() {
    let empty = ServiceInfo::new("g@@svc", "");
    assert!(!empty.validate());

    let mut bogus = ServiceInfo::new("g@@svc", "");
    bogus.hosts.push(Instance::default());
    assert!(!bogus.validate(), "host without an ip is not plausible");

    let mut ok = ServiceInfo::new("g@@svc", "");
    ok.hosts.push(Instance::new("10.0.0.1", 8080));
    assert!(ok.validate());
}

#[test]
fn test_service_info_json_uses_camel_case() {
    let mut info = ServiceInfo::new("g@@svc", "c1");
    info.last_ref_time = 42;
    info.hosts.push(Instance::new("10.0.0.1", 8080));

    let json = serde_json::to_string(&info).unwrap();
    assert!(json.contains("\"lastRefTime\":42"), "json: {json}");
    assert!(json.contains("\"cacheMillis\":1000"), "json: {json}");

    let parsed: ServiceInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.key(), "g@@svc@@c1");
    assert_eq!(parsed.ip_count(), 1);
}
