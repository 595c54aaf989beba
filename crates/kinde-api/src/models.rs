//! Normalized records shared by claim-sourced and API-sourced lookups
//!
//! Roles, permissions and entitlements all carry `(id, key, name)` so the
//! authorization evaluator never branches on where a record came from.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared type of a feature flag.
///
/// Tokens use the single-letter tags (`b`, `s`, `i`); the account API uses
/// the long names. Both deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    #[serde(alias = "b")]
    Boolean,
    #[serde(alias = "s")]
    String,
    #[serde(alias = "i")]
    Integer,
}

impl FlagType {
    /// Parse either the single-letter token tag or the long name.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "b" | "boolean" => Some(FlagType::Boolean),
            "s" | "string" => Some(FlagType::String),
            "i" | "integer" => Some(FlagType::Integer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Boolean => "boolean",
            FlagType::String => "string",
            FlagType::Integer => "integer",
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a feature flag. Equality is type-strict: `Bool(true)` never
/// equals `Str("true")` or `Int(1)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl FlagValue {
    pub fn flag_type(&self) -> FlagType {
        match self {
            FlagValue::Bool(_) => FlagType::Boolean,
            FlagValue::Int(_) => FlagType::Integer,
            FlagValue::Str(_) => FlagType::String,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FlagValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Int(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::Str(value.to_owned())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::Str(value)
    }
}

/// Feature flag as reported by the account API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiFeatureFlag {
    pub value: FlagValue,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub key: String,
    pub name: String,
}

impl RoleRecord {
    /// Expand a bare role key into a full record (`id` unknown, name = key).
    pub fn from_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            id: None,
            name: key.clone(),
            key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub key: String,
    pub name: String,
}

impl PermissionRecord {
    pub fn from_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            id: None,
            name: key.clone(),
            key,
        }
    }
}

/// Permissions granted within one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub org_code: Option<String>,
    pub permissions: Vec<PermissionRecord>,
}

impl PermissionSet {
    pub fn contains(&self, key: &str) -> bool {
        self.permissions.iter().any(|p| p.key == key)
    }
}

/// A billing entitlement (a plan feature the organization is entitled to).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub limit_max: Option<i64>,
    #[serde(default)]
    pub limit_min: Option<i64>,
    #[serde(default)]
    pub price_name: Option<String>,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub fixed_charge: Option<i64>,
}

impl EntitlementRecord {
    pub fn new(id: impl Into<String>, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            key: key.into(),
            name: name.into(),
            limit_max: None,
            limit_min: None,
            price_name: None,
            unit_amount: None,
            fixed_charge: None,
        }
    }
}

/// One page of the entitlements listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementsPage {
    pub entitlements: Vec<EntitlementRecord>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
    pub picture: Option<String>,
}
