//! Boolean authorization checks
//!
//! Every `has_*` check is an AND over its conditions with early exit. An
//! empty list is `true`. Any failure while resolving (missing token, failed
//! verification, API error) is logged and answered with `false`; these
//! checks never return an error.

use std::sync::Arc;

use kinde_api::{EntitlementRecord, RoleRecord};
use kinde_auth::{ClaimResolver, FeatureFlag};
use tracing::{debug, warn};

use crate::condition::{Condition, ForceApi, HasConditions, PermissionContext};
use crate::entitlements::EntitlementPager;

pub struct AuthorizationEvaluator {
    claims: Arc<ClaimResolver>,
    entitlements: Arc<EntitlementPager>,
}

impl AuthorizationEvaluator {
    pub fn new(claims: Arc<ClaimResolver>, entitlements: Arc<EntitlementPager>) -> Self {
        Self {
            claims,
            entitlements,
        }
    }

    /// `force_api` overrides the client default for this call.
    pub async fn has_roles(
        &self,
        conditions: &[Condition<RoleRecord>],
        force_api: Option<bool>,
    ) -> bool {
        if conditions.is_empty() {
            return true;
        }
        match self.claims.get_roles(force_api).await {
            Ok(roles) => all_match("roles", conditions, |key| {
                roles.iter().find(|role| role.key == key).cloned()
            }),
            Err(e) => check_failed("roles", &e),
        }
    }

    pub async fn has_permissions(
        &self,
        conditions: &[Condition<PermissionContext>],
        force_api: Option<bool>,
    ) -> bool {
        if conditions.is_empty() {
            return true;
        }
        match self.claims.get_permissions(force_api).await {
            Ok(set) => all_match("permissions", conditions, |key| {
                set.contains(key).then(|| PermissionContext {
                    key: key.to_owned(),
                    org_code: set.org_code.clone(),
                })
            }),
            Err(e) => check_failed("permissions", &e),
        }
    }

    pub async fn has_feature_flags(
        &self,
        conditions: &[Condition<FeatureFlag>],
        force_api: Option<bool>,
    ) -> bool {
        if conditions.is_empty() {
            return true;
        }
        match self.claims.get_feature_flags(force_api).await {
            Ok(flags) => all_match("feature_flags", conditions, |key| flags.get(key).cloned()),
            Err(e) => check_failed("feature_flags", &e),
        }
    }

    /// Always sourced from the account API.
    pub async fn has_billing_entitlements(
        &self,
        conditions: &[Condition<EntitlementRecord>],
    ) -> bool {
        if conditions.is_empty() {
            return true;
        }
        match self.entitlements.get_all_entitlements().await {
            Ok(entitlements) => all_match("billing_entitlements", conditions, |key| {
                entitlements.iter().find(|e| e.key == key).cloned()
            }),
            Err(e) => check_failed("billing_entitlements", &e),
        }
    }

    /// Every present category, in order: roles, permissions, feature flags,
    /// billing entitlements. Stops at the first failing category.
    pub async fn has(&self, conditions: &HasConditions, force_api: ForceApi) -> bool {
        self.has_roles(&conditions.roles, force_api.roles()).await
            && self
                .has_permissions(&conditions.permissions, force_api.permissions())
                .await
            && self
                .has_feature_flags(&conditions.feature_flags, force_api.feature_flags())
                .await
            && self
                .has_billing_entitlements(&conditions.billing_entitlements)
                .await
    }
}

/// AND over `conditions`: each key must resolve to a record satisfying its
/// predicate.
fn all_match<T>(
    category: &str,
    conditions: &[Condition<T>],
    lookup: impl Fn(&str) -> Option<T>,
) -> bool {
    conditions.iter().all(|condition| match lookup(condition.key()) {
        Some(record) => {
            let matched = condition.matches(&record);
            if !matched {
                debug!(category, key = condition.key(), "condition predicate rejected record");
            }
            matched
        }
        None => {
            debug!(category, key = condition.key(), "required key not present");
            false
        }
    })
}

fn check_failed(category: &str, error: &kinde_auth::Error) -> bool {
    warn!(category, error = %error, "authorization check failed, denying");
    false
}
