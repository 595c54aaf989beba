//! Session lifetime policy
//!
//! The access token's `ksp.persistent` claim decides how long the stored
//! token set survives: `false` makes it session-scoped (cookie expiry 0),
//! anything else keeps it for the configured lifetime (29 days by default).
//!
//! The claim only steers storage lifetime, never authorization, so it is
//! read from the unverified payload. A missing or malformed claim counts as
//! persistent.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use tracing::debug;

use crate::storage::Expiry;

/// Whether the session behind `access_token` should outlive the browser session.
pub fn is_session_persistent(access_token: &str) -> bool {
    match persistent_claim(access_token) {
        Some(persistent) => persistent,
        None => {
            debug!("ksp.persistent missing or malformed, defaulting to persistent");
            true
        }
    }
}

/// Cookie expiry in unix seconds: 0 for a session cookie, otherwise
/// `now + lifetime`.
pub fn cookie_expiry(access_token: &str, now_secs: u64, lifetime: Duration) -> u64 {
    if is_session_persistent(access_token) {
        now_secs.saturating_add(lifetime.as_secs())
    } else {
        0
    }
}

/// Storage expiry for a freshly issued token set.
pub fn storage_expiry(access_token: &str, now_secs: u64, lifetime: Duration) -> Expiry {
    match cookie_expiry(access_token, now_secs, lifetime) {
        0 => Expiry::Session,
        secs => Expiry::AtMillis(secs.saturating_mul(1000)),
    }
}

fn persistent_claim(token: &str) -> Option<bool> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("ksp")?.get("persistent")?.as_bool()
}
