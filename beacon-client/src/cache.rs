//! On-disk cache of service views.
//!
//! One json file per (service, clusters) view. Writes go through a temp
//! file and an atomic rename so a crash never leaves a half-written
//! view; unreadable files are skipped on load.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::error;
use tracing::warn;

use beacon_core::Result;
use beacon_core::ServiceInfo;
use beacon_core::StorageError;

/// Persists one service view under `dir/<encoded key>`.
pub fn write(
    info: &ServiceInfo,
    dir: &Path,
) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| StorageError::PathError {
        path: dir.to_path_buf(),
        source,
    })?;

    let content = if info.json_from_server.is_empty() {
        serde_json::to_string(info).map_err(StorageError::Serialization)?
    } else {
        info.json_from_server.clone()
    };

    let encoded = encode_key(&info.key());
    let target = dir.join(&encoded);
    // Not `with_extension`: keys may contain dots of their own.
    let tmp = dir.join(format!("{encoded}.tmp"));
    fs::write(&tmp, content).map_err(|source| StorageError::PathError {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, &target).map_err(|source| StorageError::PathError {
        path: target.clone(),
        source,
    })?;
    debug!(path = %target.display(), "service view persisted");
    Ok(())
}

/// Loads every parseable service view in the directory.
pub fn read(dir: &Path) -> HashMap<String, ServiceInfo> {
    let mut views = HashMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "no cache directory to load");
            return views;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || path.extension().is_some_and(|e| e == "tmp") {
            continue;
        }
        match read_one(&path) {
            Some(info) => {
                views.insert(info.key(), info);
            }
            None => warn!(path = %path.display(), "skipping unparseable cache file"),
        }
    }
    views
}

fn read_one(path: &PathBuf) -> Option<ServiceInfo> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read cache file");
            return None;
        }
    };
    let mut info: ServiceInfo = serde_json::from_str(&content).ok()?;
    if info.name.is_empty() {
        return None;
    }
    info.json_from_server = content;
    Some(info)
}

/// Makes a view key safe as a file name. Only the characters that break
/// paths are escaped, so names stay readable.
pub fn encode_key(key: &str) -> String {
    key.replace('%', "%25")
        .replace('/', "%2F")
        .replace('\\', "%5C")
}

pub fn decode_key(encoded: &str) -> String {
    encoded
        .replace("%5C", "\\")
        .replace("%2F", "/")
        .replace("%25", "%")
}
