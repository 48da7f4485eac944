use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Wall-clock epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
