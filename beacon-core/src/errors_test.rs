use crate::ConsistencyError;
use crate::Error;
use crate::NamingError;
use crate::NetworkError;

#[test]
fn test_nested_errors_convert_into_the_top_level() {
    let network: Error = NetworkError::ServiceUnavailable("draining".into()).into();
    assert!(matches!(network, Error::Network(_)));

    let naming: Error = NamingError::EmptyServiceName.into();
    assert!(matches!(naming, Error::Naming(_)));
}

#[test]
fn test_ownership_conflict_message_names_both_sides() {
    let err = ConsistencyError::OwnershipConflict {
        key: "k1".into(),
        source_peer: "peer-a".into(),
    };
    let rendered = err.to_string();
    assert!(rendered.contains("k1"));
    assert!(rendered.contains("peer-a"));
}

#[test]
fn test_payload_errors_wrap_serde() {
    let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: Error = ConsistencyError::Payload(serde_err).into();
    assert!(matches!(err, Error::Consistency(ConsistencyError::Payload(_))));
}
