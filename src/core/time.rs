//! Timestamps and ids for traces and RPC receipts.

use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Unix-epoch seconds with a `Z` suffix, e.g. `1771220592Z`.
pub fn now_epoch_z() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_epoch_z_format() {
        let result = now_epoch_z();
        assert!(result.ends_with('Z'));
        assert!(result.trim_end_matches('Z').parse::<u64>().is_ok());
    }

    #[test]
    fn test_new_event_id_is_unique_ulid() {
        let a = new_event_id();
        let b = new_event_id();
        assert_ne!(a, b);
        assert!(Ulid::from_string(&a).is_ok());
    }
}
