//! Composite datum key codec.
//!
//! Every replicated record is addressed by a flat string key carrying the
//! record kind, namespace and grouped service name. All protocol routing
//! decisions are made on the key prefix; nothing else in the cluster
//! string-matches keys.
//!
//! Instance list keys:  `com.alibaba.nacos.naming.iplist.[ephemeral.]<ns>##<group@@service>`
//! Service meta keys:   `com.alibaba.nacos.naming.domains.meta.<ns>##<group@@service>`

use crate::ConsistencyError;
use crate::Result;

pub const INSTANCE_LIST_KEY_PREFIX: &str = "com.alibaba.nacos.naming.iplist.";

pub const EPHEMERAL_KEY_PREFIX: &str = "ephemeral.";

pub const SERVICE_META_KEY_PREFIX: &str = "com.alibaba.nacos.naming.domains.meta.";

/// Separates the namespace id from the grouped service name inside a key.
pub const NAMESPACE_KEY_CONNECTOR: &str = "##";

/// Separates the group name from the service name.
pub const SERVICE_NAME_GROUP_CONNECTOR: &str = "@@";

pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

pub fn build_instance_list_key(
    namespace_id: &str,
    grouped_service_name: &str,
    ephemeral: bool,
) -> String {
    let marker = if ephemeral { EPHEMERAL_KEY_PREFIX } else { "" };
    format!("{INSTANCE_LIST_KEY_PREFIX}{marker}{namespace_id}{NAMESPACE_KEY_CONNECTOR}{grouped_service_name}")
}

pub fn build_ephemeral_instance_list_key(
    namespace_id: &str,
    grouped_service_name: &str,
) -> String {
    build_instance_list_key(namespace_id, grouped_service_name, true)
}

pub fn build_service_meta_key(
    namespace_id: &str,
    grouped_service_name: &str,
) -> String {
    format!("{SERVICE_META_KEY_PREFIX}{namespace_id}{NAMESPACE_KEY_CONNECTOR}{grouped_service_name}")
}

/// Prefixes a bare service name with the default group when no group is
/// present.
pub fn grouped_service_name(service_name: &str) -> String {
    if service_name.contains(SERVICE_NAME_GROUP_CONNECTOR) {
        service_name.to_string()
    } else {
        format!("{DEFAULT_GROUP}{SERVICE_NAME_GROUP_CONNECTOR}{service_name}")
    }
}

pub fn match_instance_list_key(key: &str) -> bool {
    key.starts_with(INSTANCE_LIST_KEY_PREFIX)
}

pub fn match_ephemeral_instance_list_key(key: &str) -> bool {
    key.starts_with(&ephemeral_instance_list_prefix())
}

pub fn match_service_meta_key(key: &str) -> bool {
    key.starts_with(SERVICE_META_KEY_PREFIX)
}

fn ephemeral_instance_list_prefix() -> String {
    format!("{INSTANCE_LIST_KEY_PREFIX}{EPHEMERAL_KEY_PREFIX}")
}

/// Extracts the namespace id from either key form.
pub fn namespace(key: &str) -> Result<&str> {
    let (ns, _) = split(key)?;
    Ok(ns)
}

/// Extracts the grouped service name (`group@@service`) from either key
/// form.
pub fn service_name(key: &str) -> Result<&str> {
    let (_, service) = split(key)?;
    Ok(service)
}

fn split(key: &str) -> Result<(&str, &str)> {
    let rest = strip_prefix(key)?;
    rest.split_once(NAMESPACE_KEY_CONNECTOR)
        .ok_or_else(|| ConsistencyError::MalformedKey(key.to_string()).into())
}

fn strip_prefix(key: &str) -> Result<&str> {
    if let Some(rest) = key.strip_prefix(SERVICE_META_KEY_PREFIX) {
        return Ok(rest);
    }
    if let Some(rest) = key.strip_prefix(INSTANCE_LIST_KEY_PREFIX) {
        return Ok(rest.strip_prefix(EPHEMERAL_KEY_PREFIX).unwrap_or(rest));
    }
    Err(ConsistencyError::MalformedKey(key.to_string()).into())
}
