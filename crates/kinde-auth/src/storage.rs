//! Client-held, TTL-aware storage
//!
//! One store holds everything the client keeps between requests: the token
//! set, the CSRF state and PKCE verifier of an in-flight login, and the
//! cached JWKS document. Each entry carries its own absolute expiry, the way
//! a cookie does, so a later request (or a new process reading the same
//! file) can tell what is still valid without any in-memory bookkeeping.
//!
//! Entries past their expiry read as absent. `Expiry::Session` entries never
//! expire by time; they live as long as the storage medium itself.
//!
//! All writes to a file-backed store use atomic temp-file + rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock;
use crate::error::{Error, Result};
use crate::token::TokenSet;

pub const TOKEN_KEY: &str = "token";
pub const STATE_KEY: &str = "state";
pub const CODE_VERIFIER_KEY: &str = "code_verifier";
pub const REDIRECT_URI_KEY: &str = "redirect_uri";
pub const JWKS_KEY: &str = "jwks";

/// When a stored entry stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Lives as long as the storage medium (a session cookie)
    Session,
    /// Absolute unix timestamp in milliseconds
    AtMillis(u64),
}

impl Expiry {
    /// Expiry `secs` seconds from now.
    pub fn in_secs(secs: u64) -> Self {
        Expiry::AtMillis(clock::unix_millis().saturating_add(secs.saturating_mul(1000)))
    }

    fn to_raw(self) -> u64 {
        match self {
            Expiry::Session => 0,
            Expiry::AtMillis(ms) => ms,
        }
    }

    fn from_raw(raw: u64) -> Self {
        if raw == 0 {
            Expiry::Session
        } else {
            Expiry::AtMillis(raw)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    /// 0 = session-scoped, otherwise unix milliseconds
    expires: u64,
}

impl Entry {
    fn is_expired(&self, now_millis: u64) -> bool {
        self.expires != 0 && now_millis >= self.expires
    }
}

/// Token set persisted together with the absolute expiry of its access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(flatten)]
    pub tokens: TokenSet,
    /// Access-token expiry as unix milliseconds
    pub expires_at: u64,
}

impl StoredToken {
    pub fn new(tokens: TokenSet, issued_at_millis: u64) -> Self {
        let expires_at = issued_at_millis.saturating_add(tokens.expires_in.saturating_mul(1000));
        Self { tokens, expires_at }
    }

    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.expires_at
    }
}

impl std::fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredToken")
            .field("tokens", &self.tokens)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

struct Inner {
    prefix: String,
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, Entry>>,
}

/// Shared handle to the client's storage medium.
///
/// Cloning is cheap; clones see the same entries. Pass one handle to every
/// component instead of reaching for global state.
#[derive(Clone)]
pub struct TokenStorage {
    inner: Arc<Inner>,
}

impl TokenStorage {
    /// Storage that lives only in this process.
    pub fn in_memory(prefix: &str) -> Self {
        Self::with_entries(prefix, None, HashMap::new())
    }

    /// Storage persisted to a JSON file at `path`.
    ///
    /// A missing file starts an empty store and is created on the spot.
    pub async fn load(path: PathBuf, prefix: &str) -> Result<Self> {
        let entries = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Storage(format!("reading storage file: {e}")))?;
            let entries: HashMap<String, Entry> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing storage file: {e}")))?;
            info!(path = %path.display(), entries = entries.len(), "loaded client storage");
            entries
        } else {
            info!(path = %path.display(), "storage file not found, starting empty");
            let entries = HashMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self::with_entries(prefix, Some(path), entries))
    }

    fn with_entries(prefix: &str, path: Option<PathBuf>, entries: HashMap<String, Entry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                prefix: prefix.to_owned(),
                path,
                entries: Mutex::new(entries),
            }),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Full storage key (`<prefix>_<name>`) for an entry name.
    pub fn key(&self, name: &str) -> String {
        format!("{}_{name}", self.inner.prefix)
    }

    /// Read an entry, treating expired entries as absent.
    pub async fn get(&self, name: &str) -> Option<String> {
        let key = self.key(name);
        let mut entries = self.inner.entries.lock().await;
        if entries.get(&key)?.is_expired(clock::unix_millis()) {
            debug!(key = %key, "storage entry expired");
            entries.remove(&key);
            return None;
        }
        entries.get(&key).map(|entry| entry.value.clone())
    }

    /// Expiry of a live entry.
    pub async fn expiry(&self, name: &str) -> Option<Expiry> {
        let key = self.key(name);
        let entries = self.inner.entries.lock().await;
        entries
            .get(&key)
            .filter(|e| !e.is_expired(clock::unix_millis()))
            .map(|e| Expiry::from_raw(e.expires))
    }

    /// Write or replace an entry.
    pub async fn set(&self, name: &str, value: String, expiry: Expiry) -> Result<()> {
        let key = self.key(name);
        let mut entries = self.inner.entries.lock().await;
        entries.insert(
            key.clone(),
            Entry {
                value,
                expires: expiry.to_raw(),
            },
        );
        debug!(key = %key, ?expiry, "stored entry");
        self.persist(&entries).await
    }

    /// Remove an entry. Removing a missing entry is not an error.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let key = self.key(name);
        let mut entries = self.inner.entries.lock().await;
        if entries.remove(&key).is_some() {
            debug!(key = %key, "removed entry");
            self.persist(&entries).await?;
        }
        Ok(())
    }

    /// Remove every entry under this store's prefix.
    pub async fn clear(&self) -> Result<()> {
        let prefix = format!("{}_", self.inner.prefix);
        let mut entries = self.inner.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        if entries.len() != before {
            debug!(removed = before - entries.len(), "cleared storage");
            self.persist(&entries).await?;
        }
        Ok(())
    }

    /// Current token set, if one is stored.
    ///
    /// An undecodable token entry reads as absent.
    pub async fn token(&self) -> Option<StoredToken> {
        let raw = self.get(TOKEN_KEY).await?;
        match serde_json::from_str(&raw) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(error = %e, "discarding undecodable token entry");
                None
            }
        }
    }

    pub async fn set_token(&self, token: &StoredToken, expiry: Expiry) -> Result<()> {
        let raw = serde_json::to_string(token)
            .map_err(|e| Error::Storage(format!("serializing token: {e}")))?;
        self.set(TOKEN_KEY, raw, expiry).await
    }

    pub async fn state(&self) -> Option<String> {
        self.get(STATE_KEY).await
    }

    pub async fn set_state(&self, state: &str, expiry: Expiry) -> Result<()> {
        self.set(STATE_KEY, state.to_owned(), expiry).await
    }

    pub async fn code_verifier(&self) -> Option<String> {
        self.get(CODE_VERIFIER_KEY).await
    }

    pub async fn set_code_verifier(&self, verifier: &str, expiry: Expiry) -> Result<()> {
        self.set(CODE_VERIFIER_KEY, verifier.to_owned(), expiry).await
    }

    /// Redirect URI the pending login sent to the authorize endpoint.
    pub async fn redirect_uri(&self) -> Option<String> {
        self.get(REDIRECT_URI_KEY).await
    }

    pub async fn set_redirect_uri(&self, redirect_uri: &str, expiry: Expiry) -> Result<()> {
        self.set(REDIRECT_URI_KEY, redirect_uri.to_owned(), expiry).await
    }

    /// Drop the CSRF state, PKCE verifier and redirect URI of the last
    /// login attempt.
    pub async fn clear_auth_state(&self) -> Result<()> {
        self.remove(STATE_KEY).await?;
        self.remove(CODE_VERIFIER_KEY).await?;
        self.remove(REDIRECT_URI_KEY).await
    }

    async fn persist(&self, entries: &HashMap<String, Entry>) -> Result<()> {
        match &self.inner.path {
            Some(path) => write_atomic(path, entries).await,
            None => Ok(()),
        }
    }
}

/// Write entries to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since the file holds tokens.
async fn write_atomic(path: &Path, entries: &HashMap<String, Entry>) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| Error::Storage(format!("serializing storage: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("storage path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".kinde-storage.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp storage file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting storage file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp storage file: {e}")))?;

    debug!(path = %path.display(), "persisted storage");
    Ok(())
}
