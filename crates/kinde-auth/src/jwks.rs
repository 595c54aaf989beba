//! Cache for the identity provider's public signing keys
//!
//! The key set is kept in `TokenStorage` under `<prefix>_jwks`, stamped with
//! an absolute expiry. An entry past its TTL is a cache miss and is never
//! served; the next lookup refetches and replaces it wholesale.

use std::time::Duration;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::storage::{Expiry, JWKS_KEY, TokenStorage};

/// Cached key set with its absolute expiry (unix milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksCacheEntry {
    pub keys: JwkSet,
    pub expires_at: u64,
}

impl JwksCacheEntry {
    pub fn is_fresh(&self, now_millis: u64) -> bool {
        now_millis < self.expires_at
    }
}

pub struct JwksCache {
    url: String,
    client: reqwest::Client,
    storage: TokenStorage,
    ttl: Duration,
}

impl JwksCache {
    pub fn new(
        url: impl Into<String>,
        client: reqwest::Client,
        storage: TokenStorage,
        ttl: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            client,
            storage,
            ttl,
        }
    }

    pub fn from_config(
        config: &ClientConfig,
        client: reqwest::Client,
        storage: TokenStorage,
    ) -> Self {
        Self::new(config.endpoints().jwks.clone(), client, storage, config.jwks_ttl())
    }

    /// Current key set, fetched when the cache is empty or stale.
    pub async fn get_keys(&self) -> Result<JwkSet> {
        if let Some(keys) = self.cached().await {
            debug!("JWKS cache hit");
            return Ok(keys);
        }
        self.refresh().await
    }

    /// Key matching `kid`, or the first key when the token names none.
    ///
    /// A `kid` missing from a cached set triggers one refetch, which covers
    /// key rotation on the provider side.
    pub async fn find_key(&self, kid: Option<&str>) -> Result<Jwk> {
        let (keys, from_cache) = match self.cached().await {
            Some(keys) => (keys, true),
            None => (self.refresh().await?, false),
        };
        if let Some(jwk) = select(&keys, kid) {
            return Ok(jwk);
        }
        if from_cache {
            info!(kid, "signing key not in cached JWKS, refetching");
            let keys = self.refresh().await?;
            if let Some(jwk) = select(&keys, kid) {
                return Ok(jwk);
            }
        }
        Err(Error::Verification(format!(
            "no JWKS key matches kid {}",
            kid.unwrap_or("<none>")
        )))
    }

    /// Fetch the key set and replace the cache entry.
    pub async fn refresh(&self) -> Result<JwkSet> {
        let keys = self.fetch().await?;
        let expires_at = clock::unix_millis() + self.ttl.as_millis() as u64;
        let entry = JwksCacheEntry {
            keys: keys.clone(),
            expires_at,
        };
        let raw = serde_json::to_string(&entry)
            .map_err(|e| Error::Storage(format!("serializing JWKS: {e}")))?;
        self.storage
            .set(JWKS_KEY, raw, Expiry::AtMillis(expires_at))
            .await?;
        debug!(keys = keys.keys.len(), ttl_secs = self.ttl.as_secs(), "cached JWKS");
        Ok(keys)
    }

    /// Drop the cached key set.
    pub async fn clear(&self) -> Result<()> {
        self.storage.remove(JWKS_KEY).await
    }

    async fn cached(&self) -> Option<JwkSet> {
        let raw = self.storage.get(JWKS_KEY).await?;
        let entry: JwksCacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "discarding undecodable JWKS cache entry");
                return None;
            }
        };
        entry.is_fresh(clock::unix_millis()).then_some(entry.keys)
    }

    async fn fetch(&self) -> Result<JwkSet> {
        debug!(url = %self.url, "fetching JWKS");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("JWKS request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("JWKS endpoint returned {status}")));
        }

        let keys = response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::Verification(format!("invalid JWKS document: {e}")))?;
        if keys.keys.is_empty() {
            return Err(Error::Verification("JWKS document has no keys".into()));
        }
        Ok(keys)
    }
}

fn select(keys: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => keys.find(kid).cloned(),
        None => keys.keys.first().cloned(),
    }
}
