use serde::Deserialize;
use serde::Serialize;

use crate::utils::now_millis;

/// Replicated metadata of a service container.
///
/// This is the payload handed to service-meta listeners; the mutable
/// instance state of a service lives in the server registry, keyed by the
/// parallel instance-list key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceMeta {
    pub namespace_id: String,
    pub group_name: String,
    /// Grouped service name (`group@@service`).
    pub name: String,
    pub last_modified_millis: u64,
    pub checksum: String,
}

impl ServiceMeta {
    pub fn new(
        namespace_id: impl Into<String>,
        group_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut meta = Self {
            namespace_id: namespace_id.into(),
            group_name: group_name.into(),
            name: name.into(),
            last_modified_millis: now_millis(),
            checksum: String::new(),
        };
        meta.recalculate_checksum();
        meta
    }

    /// Content checksum over the identity fields. `last_modified_millis` is
    /// bookkeeping, not content, and is excluded.
    pub fn recalculate_checksum(&mut self) {
        let content = format!("{}##{}##{}", self.namespace_id, self.group_name, self.name);
        self.checksum = format!("{:08x}", crc32fast::hash(content.as_bytes()));
    }
}
