//! Authorization conditions
//!
//! A condition names a key that must be present (a role, a permission, a
//! feature flag, an entitlement) and optionally a predicate the matched
//! record must also satisfy.

use std::fmt;
use std::sync::Arc;

use kinde_api::FlagValue;
use kinde_auth::FeatureFlag;
use serde::{Deserialize, Serialize};

/// Predicate over the matched record of a condition.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

pub struct Condition<T> {
    key: String,
    predicate: Option<Predicate<T>>,
}

impl<T> Condition<T> {
    /// Existence check only.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            predicate: None,
        }
    }

    /// Existence check plus `predicate` over the matched record.
    pub fn with(
        key: impl Into<String>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    /// Whether `record`, already matched by key, satisfies the predicate.
    pub fn matches(&self, record: &T) -> bool {
        self.predicate.as_ref().is_none_or(|predicate| predicate(record))
    }
}

impl Condition<FeatureFlag> {
    /// Flag must exist and hold exactly `value`. No coercion between types.
    pub fn equals(key: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        let expected = value.into();
        Self::with(key, move |flag: &FeatureFlag| flag.value == expected)
    }
}

impl<T> Clone for Condition<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<T> fmt::Debug for Condition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("key", &self.key)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl<T> From<&str> for Condition<T> {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl<T> From<String> for Condition<T> {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// What a permission predicate sees: the permission key and the
/// organization it was granted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionContext {
    pub key: String,
    pub org_code: Option<String>,
}

/// Which lookups go through the account API instead of token claims.
///
/// Billing entitlements always come from the API and have no switch here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceApi {
    /// One switch for roles, permissions and feature flags
    All(bool),
    /// Per category; `None` falls back to the client default
    PerCategory {
        roles: Option<bool>,
        permissions: Option<bool>,
        feature_flags: Option<bool>,
    },
}

impl ForceApi {
    pub fn roles(&self) -> Option<bool> {
        match self {
            ForceApi::All(force) => Some(*force),
            ForceApi::PerCategory { roles, .. } => *roles,
        }
    }

    pub fn permissions(&self) -> Option<bool> {
        match self {
            ForceApi::All(force) => Some(*force),
            ForceApi::PerCategory { permissions, .. } => *permissions,
        }
    }

    pub fn feature_flags(&self) -> Option<bool> {
        match self {
            ForceApi::All(force) => Some(*force),
            ForceApi::PerCategory { feature_flags, .. } => *feature_flags,
        }
    }
}

impl Default for ForceApi {
    fn default() -> Self {
        ForceApi::PerCategory {
            roles: None,
            permissions: None,
            feature_flags: None,
        }
    }
}

impl From<bool> for ForceApi {
    fn from(force: bool) -> Self {
        ForceApi::All(force)
    }
}

/// Conditions across every category, for `has()`.
///
/// An empty category is skipped.
#[derive(Debug, Clone, Default)]
pub struct HasConditions {
    pub roles: Vec<Condition<kinde_api::RoleRecord>>,
    pub permissions: Vec<Condition<PermissionContext>>,
    pub feature_flags: Vec<Condition<FeatureFlag>>,
    pub billing_entitlements: Vec<Condition<kinde_api::EntitlementRecord>>,
}

impl HasConditions {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
            && self.permissions.is_empty()
            && self.feature_flags.is_empty()
            && self.billing_entitlements.is_empty()
    }
}
