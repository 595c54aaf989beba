//! Billing entitlements
//!
//! Entitlements are never embedded in tokens; they always come from the
//! paginated account API. `get_all_entitlements` walks the `starting_after`
//! cursor until the API reports no more pages or returns an empty page.

use std::sync::Arc;

use kinde_api::{AccountApi, EntitlementRecord};
use kinde_auth::clock;
use kinde_auth::{Error, Result, TokenStorage};
use tracing::{debug, warn};

pub struct EntitlementPager {
    storage: TokenStorage,
    api: Arc<dyn AccountApi>,
    page_size: Option<u32>,
}

impl EntitlementPager {
    pub fn new(storage: TokenStorage, api: Arc<dyn AccountApi>) -> Self {
        Self {
            storage,
            api,
            page_size: None,
        }
    }

    /// Request pages of `page_size` entitlements instead of the API default.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Every entitlement, pages concatenated in order.
    pub async fn get_all_entitlements(&self) -> Result<Vec<EntitlementRecord>> {
        let token = self.access_token().await?;

        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;
        loop {
            let page = self
                .api
                .entitlements(&token, cursor.as_deref(), self.page_size)
                .await?;
            pages += 1;

            let last_id = page.entitlements.last().and_then(|e| e.id.clone());
            let empty = page.entitlements.is_empty();
            all.extend(page.entitlements);
            if !page.has_more || empty {
                break;
            }

            let next = page.next_cursor.or(last_id);
            if next.is_none() || next == cursor {
                warn!(pages, "entitlements page reports more results but no new cursor");
                break;
            }
            cursor = next;
        }

        debug!(pages, entitlements = all.len(), "fetched entitlements");
        Ok(all)
    }

    pub async fn get_entitlement(&self, key: &str) -> Result<Option<EntitlementRecord>> {
        Ok(self
            .get_all_entitlements()
            .await?
            .into_iter()
            .find(|e| e.key == key))
    }

    pub async fn has_entitlement(&self, key: &str) -> Result<bool> {
        Ok(self.get_entitlement(key).await?.is_some())
    }

    /// Upper usage limit of an entitlement, when it has one.
    pub async fn get_entitlement_limit(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .get_entitlement(key)
            .await?
            .and_then(|e| e.limit_max))
    }

    async fn access_token(&self) -> Result<String> {
        match self.storage.token().await {
            Some(stored) if !stored.is_expired(clock::unix_millis()) => {
                Ok(stored.tokens.access_token)
            }
            _ => Err(Error::Token("authentication required".into())),
        }
    }
}
