//! Wall-clock helpers. Stored expiries are absolute unix timestamps so a
//! later request can judge them without in-process state.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn unix_secs() -> u64 {
    unix_millis() / 1000
}
