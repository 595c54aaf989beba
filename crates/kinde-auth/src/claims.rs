//! Verified claim access
//!
//! Every claim read goes through signature verification against the cached
//! JWKS; a token that fails verification is an error, never a fallback to
//! the unverified payload. In forced-API mode, claims that have an account
//! API equivalent (feature flags, permissions, roles, org code, profile
//! fields) are read from the API instead of the token.

use std::collections::BTreeMap;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use kinde_api::{AccountApi, FlagType, FlagValue, PermissionRecord, PermissionSet, RoleRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::jwks::JwksCache;
use crate::storage::TokenStorage;

/// Which stored token a claim is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenKind {
    #[default]
    AccessToken,
    IdToken,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::AccessToken => "access_token",
            TokenKind::IdToken => "id_token",
        }
    }
}

/// A single claim. `value` is `None` when the claim is absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Claim {
    pub name: String,
    pub value: Option<Value>,
}

/// A resolved feature flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub code: String,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    pub value: FlagValue,
    /// True when the flag was absent and the caller's default was used
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub org_code: Option<String>,
    pub is_granted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub org_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOrganizations {
    pub org_codes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    pub id: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
    pub picture: Option<String>,
}

const PROFILE_CLAIMS: &[&str] = &["given_name", "family_name", "email", "picture"];

pub struct ClaimResolver {
    storage: TokenStorage,
    jwks: Arc<JwksCache>,
    api: Arc<dyn AccountApi>,
    force_api: bool,
}

impl ClaimResolver {
    pub fn new(
        storage: TokenStorage,
        jwks: Arc<JwksCache>,
        api: Arc<dyn AccountApi>,
        force_api: bool,
    ) -> Self {
        Self {
            storage,
            jwks,
            api,
            force_api,
        }
    }

    /// Instance default for routing lookups through the account API.
    pub fn force_api(&self) -> bool {
        self.force_api
    }

    pub fn api(&self) -> &Arc<dyn AccountApi> {
        &self.api
    }

    /// Stored access token, unverified.
    pub async fn access_token(&self) -> Result<String> {
        self.raw_token(TokenKind::AccessToken).await
    }

    /// Verified claim set of the selected token.
    pub async fn get_claims(&self, kind: TokenKind) -> Result<Map<String, Value>> {
        let token = self.raw_token(kind).await?;
        self.verify(&token).await
    }

    /// One claim, or the account API equivalent in forced-API mode.
    pub async fn get_claim(&self, name: &str, kind: TokenKind) -> Result<Claim> {
        if self.force_api
            && let Some(value) = self.claim_from_api(name).await?
        {
            return Ok(Claim {
                name: name.to_owned(),
                value: Some(value),
            });
        }

        let value = self.get_claims(kind).await?.remove(name);
        if value.is_none() {
            info!(claim = name, token = kind.as_str(), "claim not present in token");
        }
        Ok(Claim {
            name: name.to_owned(),
            value,
        })
    }

    /// All feature flags, keyed by code.
    ///
    /// `force_api` overrides the instance default for this call.
    pub async fn get_feature_flags(
        &self,
        force_api: Option<bool>,
    ) -> Result<BTreeMap<String, FeatureFlag>> {
        if force_api.unwrap_or(self.force_api) {
            let token = self.access_token().await?;
            let flags = self.api.feature_flags(&token).await?;
            return Ok(flags
                .into_iter()
                .map(|(code, flag)| {
                    let resolved = FeatureFlag {
                        code: code.clone(),
                        flag_type: flag.flag_type,
                        value: flag.value,
                        is_default: false,
                    };
                    (code, resolved)
                })
                .collect());
        }

        let claims = self.get_claims(TokenKind::AccessToken).await?;
        Ok(claims
            .get("feature_flags")
            .map(parse_flag_claim)
            .unwrap_or_default())
    }

    /// Look up one flag.
    ///
    /// A missing flag yields `default` marked `is_default`; with no default
    /// it is `NotFound`. When `flag_type` is given it must match the flag's
    /// declared type exactly, or the default's type when the flag is missing.
    pub async fn get_flag(
        &self,
        code: &str,
        default: Option<FlagValue>,
        flag_type: Option<FlagType>,
    ) -> Result<FeatureFlag> {
        let check_type = |actual: FlagType| match flag_type {
            Some(requested) if requested != actual => Err(Error::TypeMismatch {
                code: code.to_owned(),
                requested,
                actual,
            }),
            _ => Ok(()),
        };

        let mut flags = self.get_feature_flags(None).await?;
        match flags.remove(code) {
            Some(flag) => {
                check_type(flag.flag_type)?;
                Ok(flag)
            }
            None => match default {
                Some(value) => {
                    check_type(value.flag_type())?;
                    debug!(flag = code, "feature flag missing, using default");
                    Ok(FeatureFlag {
                        code: code.to_owned(),
                        flag_type: value.flag_type(),
                        value,
                        is_default: true,
                    })
                }
                None => Err(Error::NotFound(format!(
                    "feature flag '{code}' not found and no default given"
                ))),
            },
        }
    }

    pub async fn get_boolean_flag(&self, code: &str, default: Option<bool>) -> Result<FeatureFlag> {
        self.get_flag(code, default.map(FlagValue::Bool), Some(FlagType::Boolean))
            .await
    }

    pub async fn get_string_flag(&self, code: &str, default: Option<&str>) -> Result<FeatureFlag> {
        self.get_flag(code, default.map(FlagValue::from), Some(FlagType::String))
            .await
    }

    pub async fn get_integer_flag(&self, code: &str, default: Option<i64>) -> Result<FeatureFlag> {
        self.get_flag(code, default.map(FlagValue::Int), Some(FlagType::Integer))
            .await
    }

    /// Roles of the current user. Bare role keys in the token are expanded
    /// into full records.
    pub async fn get_roles(&self, force_api: Option<bool>) -> Result<Vec<RoleRecord>> {
        if force_api.unwrap_or(self.force_api) {
            let token = self.access_token().await?;
            return Ok(self.api.roles(&token).await?);
        }

        let claims = self.get_claims(TokenKind::AccessToken).await?;
        Ok(records(claims.get("roles"))
            .map(|(id, key, name)| RoleRecord { id, key, name })
            .collect())
    }

    pub async fn get_permissions(&self, force_api: Option<bool>) -> Result<PermissionSet> {
        if force_api.unwrap_or(self.force_api) {
            let token = self.access_token().await?;
            return Ok(self.api.permissions(&token).await?);
        }

        let claims = self.get_claims(TokenKind::AccessToken).await?;
        Ok(PermissionSet {
            org_code: string_claim(&claims, "org_code"),
            permissions: records(claims.get("permissions"))
                .map(|(id, key, name)| PermissionRecord { id, key, name })
                .collect(),
        })
    }

    pub async fn get_permission(&self, key: &str) -> Result<PermissionGrant> {
        let set = self.get_permissions(None).await?;
        Ok(PermissionGrant {
            is_granted: set.contains(key),
            org_code: set.org_code,
        })
    }

    pub async fn get_organization(&self) -> Result<Organization> {
        if self.force_api {
            let token = self.access_token().await?;
            let set = self.api.permissions(&token).await?;
            return Ok(Organization {
                org_code: set.org_code,
            });
        }
        let claims = self.get_claims(TokenKind::AccessToken).await?;
        Ok(Organization {
            org_code: string_claim(&claims, "org_code"),
        })
    }

    /// Organizations the user belongs to, from the id token.
    pub async fn get_user_organizations(&self) -> Result<UserOrganizations> {
        let claims = self.get_claims(TokenKind::IdToken).await?;
        let org_codes = claims
            .get("org_codes")
            .and_then(Value::as_array)
            .map(|codes| {
                codes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        Ok(UserOrganizations { org_codes })
    }

    /// Profile of the signed-in user, from the id token or the profile
    /// endpoint in forced-API mode.
    pub async fn get_user_details(&self) -> Result<UserDetails> {
        if self.force_api {
            let token = self.access_token().await?;
            let profile = self.api.user_profile(&token).await?;
            return Ok(UserDetails {
                id: profile.id,
                given_name: profile.given_name,
                family_name: profile.family_name,
                email: profile.email,
                picture: profile.picture,
            });
        }
        let claims = self.get_claims(TokenKind::IdToken).await?;
        Ok(UserDetails {
            id: string_claim(&claims, "sub"),
            given_name: string_claim(&claims, "given_name"),
            family_name: string_claim(&claims, "family_name"),
            email: string_claim(&claims, "email"),
            picture: string_claim(&claims, "picture"),
        })
    }

    async fn raw_token(&self, kind: TokenKind) -> Result<String> {
        let stored = self
            .storage
            .token()
            .await
            .ok_or_else(|| Error::Token("no access token in storage".into()))?;
        match kind {
            TokenKind::AccessToken => Ok(stored.tokens.access_token),
            TokenKind::IdToken => stored
                .tokens
                .id_token
                .ok_or_else(|| Error::Token("no id token in storage".into())),
        }
    }

    async fn verify(&self, token: &str) -> Result<Map<String, Value>> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::Verification(format!("malformed token header: {e}")))?;
        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(Error::Verification(format!(
                "symmetric algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let jwk = self.jwks.find_key(header.kid.as_deref()).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| Error::Verification(format!("unusable JWKS key: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation)
            .map_err(|e| Error::Verification(e.to_string()))?;
        Ok(data.claims)
    }

    async fn claim_from_api(&self, name: &str) -> Result<Option<Value>> {
        let token = self.access_token().await?;
        let value = match name {
            "feature_flags" => {
                let flags = self.api.feature_flags(&token).await?;
                let shaped: Map<String, Value> = flags
                    .into_iter()
                    .map(|(code, flag)| {
                        let tag = short_tag(flag.flag_type);
                        (code, json!({ "t": tag, "v": flag.value }))
                    })
                    .collect();
                Value::Object(shaped)
            }
            "permissions" => {
                let set = self.api.permissions(&token).await?;
                Value::Array(
                    set.permissions
                        .into_iter()
                        .map(|p| Value::String(p.key))
                        .collect(),
                )
            }
            "org_code" => {
                let set = self.api.permissions(&token).await?;
                set.org_code.map(Value::String).unwrap_or(Value::Null)
            }
            "roles" => {
                let roles = self.api.roles(&token).await?;
                serde_json::to_value(roles)
                    .map_err(|e| Error::Api(format!("encoding roles: {e}")))?
            }
            field if PROFILE_CLAIMS.contains(&field) => {
                let profile = self.api.user_profile(&token).await?;
                let value = match field {
                    "given_name" => profile.given_name,
                    "family_name" => profile.family_name,
                    "email" => profile.email,
                    _ => profile.picture,
                };
                value.map(Value::String).unwrap_or(Value::Null)
            }
            _ => return Ok(None),
        };
        debug!(claim = name, "claim resolved through account API");
        Ok(Some(value))
    }
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Option<String> {
    claims.get(name).and_then(Value::as_str).map(str::to_owned)
}

fn short_tag(flag_type: FlagType) -> &'static str {
    match flag_type {
        FlagType::Boolean => "b",
        FlagType::String => "s",
        FlagType::Integer => "i",
    }
}

/// Parse the `feature_flags` claim: `{code: {"t": tag, "v": value}}`.
///
/// Entries with an unknown tag, or a value that does not match its tag, are
/// skipped.
fn parse_flag_claim(claim: &Value) -> BTreeMap<String, FeatureFlag> {
    let Some(entries) = claim.as_object() else {
        warn!("feature_flags claim is not an object");
        return BTreeMap::new();
    };

    let mut flags = BTreeMap::new();
    for (code, entry) in entries {
        let flag_type = entry
            .get("t")
            .and_then(Value::as_str)
            .and_then(FlagType::from_tag);
        let value = entry
            .get("v")
            .cloned()
            .and_then(|v| serde_json::from_value::<FlagValue>(v).ok());
        match (flag_type, value) {
            (Some(flag_type), Some(value)) if value.flag_type() == flag_type => {
                flags.insert(
                    code.clone(),
                    FeatureFlag {
                        code: code.clone(),
                        flag_type,
                        value,
                        is_default: false,
                    },
                );
            }
            _ => warn!(flag = %code, "skipping malformed feature flag claim"),
        }
    }
    flags
}

/// Normalize a roles/permissions claim into `(id, key, name)` triples.
///
/// Accepts bare keys (`"admin"`) and objects (`{"id", "key", "name"}`); a
/// bare key becomes `(None, key, key)`.
fn records(claim: Option<&Value>) -> impl Iterator<Item = (Option<String>, String, String)> + '_ {
    claim
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| match item {
            Value::String(key) => Some((None, key.clone(), key.clone())),
            Value::Object(fields) => {
                let key = fields.get("key").and_then(Value::as_str)?.to_owned();
                let id = fields.get("id").and_then(Value::as_str).map(str::to_owned);
                let name = fields
                    .get("name")
                    .and_then(Value::as_str)
                    .map_or_else(|| key.clone(), str::to_owned);
                Some((id, key, name))
            }
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::storage::{Expiry, StoredToken};
    use crate::testing::{self, FakeAccountApi};
    use crate::token::TokenSet;
    use kinde_api::{ApiFeatureFlag, UserProfile};
    use std::collections::HashMap;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        resolver: ClaimResolver,
        api: Arc<FakeAccountApi>,
        _server: MockServer,
    }

    async fn fixture(
        access: Value,
        id: Option<Value>,
        api: FakeAccountApi,
        force_api: bool,
    ) -> Fixture {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(testing::jwks_json()))
            .mount(&server)
            .await;

        let storage = TokenStorage::in_memory("kinde");
        let tokens = TokenSet {
            access_token: testing::sign_fresh(access),
            id_token: id.map(testing::sign_fresh),
            refresh_token: None,
            token_type: "bearer".into(),
            expires_in: 3600,
            scope: None,
        };
        storage
            .set_token(&StoredToken::new(tokens, clock::unix_millis()), Expiry::Session)
            .await
            .unwrap();

        let jwks = Arc::new(JwksCache::new(
            format!("{}/.well-known/jwks.json", server.uri()),
            reqwest::Client::new(),
            storage.clone(),
            Duration::from_secs(60),
        ));
        let api = Arc::new(api);
        Fixture {
            resolver: ClaimResolver::new(storage, jwks, api.clone(), force_api),
            api,
            _server: server,
        }
    }

    fn access_claims() -> Value {
        json!({
            "sub": "kp_123",
            "org_code": "org_abc",
            "permissions": ["read:reports", "write:reports"],
            "roles": ["admin", {"id": "r_2", "key": "billing", "name": "Billing"}],
            "feature_flags": {
                "dark_mode": {"t": "b", "v": true},
                "theme": {"t": "s", "v": "ocean"},
                "max_seats": {"t": "i", "v": 5},
                "broken": {"t": "b", "v": "yes"}
            }
        })
    }

    fn id_claims() -> Value {
        json!({
            "sub": "kp_123",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "email": "ada@example.com",
            "org_codes": ["org_abc", "org_def"]
        })
    }

    #[tokio::test]
    async fn boolean_flag_from_claims() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let flag = f.resolver.get_boolean_flag("dark_mode", None).await.unwrap();
        assert_eq!(
            flag,
            FeatureFlag {
                code: "dark_mode".into(),
                flag_type: FlagType::Boolean,
                value: FlagValue::Bool(true),
                is_default: false,
            }
        );
        assert_eq!(
            serde_json::to_value(&flag).unwrap(),
            json!({"code": "dark_mode", "type": "boolean", "value": true, "is_default": false})
        );
    }

    #[tokio::test]
    async fn requested_type_must_match_declared_type() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let err = f
            .resolver
            .get_flag("theme", Some(FlagValue::Bool(false)), Some(FlagType::Boolean))
            .await
            .unwrap_err();
        match err {
            Error::TypeMismatch {
                code,
                requested,
                actual,
            } => {
                assert_eq!(code, "theme");
                assert_eq!(requested, FlagType::Boolean);
                assert_eq!(actual, FlagType::String);
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_flag_falls_back_to_default() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let flag = f.resolver.get_integer_flag("seats_extra", Some(3)).await.unwrap();
        assert_eq!(flag.value, FlagValue::Int(3));
        assert!(flag.is_default);

        let err = f.resolver.get_string_flag("nope", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn default_must_match_requested_type() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let err = f
            .resolver
            .get_flag("seats_extra", Some(FlagValue::Int(3)), Some(FlagType::Boolean))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                Error::TypeMismatch {
                    requested: FlagType::Boolean,
                    actual: FlagType::Integer,
                    ..
                }
            ),
            "got: {err:?}"
        );

        let flag = f
            .resolver
            .get_flag("seats_extra", Some(FlagValue::Int(3)), None)
            .await
            .unwrap();
        assert_eq!(flag.flag_type, FlagType::Integer);
        assert!(flag.is_default);
    }

    #[tokio::test]
    async fn malformed_flag_entries_are_skipped() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let flags = f.resolver.get_feature_flags(None).await.unwrap();
        assert_eq!(flags.len(), 3);
        assert!(!flags.contains_key("broken"));
        assert_eq!(flags["max_seats"].value, FlagValue::Int(5));
    }

    #[tokio::test]
    async fn roles_are_normalized() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let roles = f.resolver.get_roles(None).await.unwrap();
        assert_eq!(
            roles,
            vec![
                RoleRecord::from_key("admin"),
                RoleRecord {
                    id: Some("r_2".into()),
                    key: "billing".into(),
                    name: "Billing".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn permissions_and_org_from_claims() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let grant = f.resolver.get_permission("read:reports").await.unwrap();
        assert_eq!(
            grant,
            PermissionGrant {
                org_code: Some("org_abc".into()),
                is_granted: true,
            }
        );
        assert!(!f.resolver.get_permission("delete:reports").await.unwrap().is_granted);
        assert_eq!(
            f.resolver.get_organization().await.unwrap().org_code.as_deref(),
            Some("org_abc")
        );
        assert_eq!(f.api.calls(), 0);
    }

    #[tokio::test]
    async fn id_token_details_and_organizations() {
        let f = fixture(access_claims(), Some(id_claims()), FakeAccountApi::default(), false).await;
        let details = f.resolver.get_user_details().await.unwrap();
        assert_eq!(details.id.as_deref(), Some("kp_123"));
        assert_eq!(details.email.as_deref(), Some("ada@example.com"));
        assert!(details.picture.is_none());

        let orgs = f.resolver.get_user_organizations().await.unwrap();
        assert_eq!(orgs.org_codes, vec!["org_abc", "org_def"]);
    }

    #[tokio::test]
    async fn missing_id_token_is_token_error() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let err = f.resolver.get_claims(TokenKind::IdToken).await.unwrap_err();
        assert!(matches!(err, Error::Token(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn empty_storage_is_token_error() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        f.resolver.storage.clear().await.unwrap();
        let err = f.resolver.get_claim("sub", TokenKind::AccessToken).await.unwrap_err();
        assert!(matches!(err, Error::Token(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn absent_claim_is_none_not_error() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let claim = f
            .resolver
            .get_claim("not_there", TokenKind::AccessToken)
            .await
            .unwrap();
        assert_eq!(claim.value, None);
        let claim = f.resolver.get_claim("sub", TokenKind::AccessToken).await.unwrap();
        assert_eq!(claim.value, Some(json!("kp_123")));
    }

    #[tokio::test]
    async fn forced_api_routes_known_claims() {
        let mut flags = HashMap::new();
        flags.insert(
            "dark_mode".to_string(),
            ApiFeatureFlag {
                value: FlagValue::Bool(false),
                flag_type: FlagType::Boolean,
            },
        );
        let api = FakeAccountApi {
            flags,
            permissions: PermissionSet {
                org_code: Some("org_api".into()),
                permissions: vec![PermissionRecord::from_key("read:api")],
            },
            profile: UserProfile {
                email: Some("api@example.com".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let f = fixture(access_claims(), None, api, true).await;

        let claim = f.resolver.get_claim("org_code", TokenKind::AccessToken).await.unwrap();
        assert_eq!(claim.value, Some(json!("org_api")));

        let claim = f
            .resolver
            .get_claim("feature_flags", TokenKind::AccessToken)
            .await
            .unwrap();
        assert_eq!(claim.value, Some(json!({"dark_mode": {"t": "b", "v": false}})));

        let claim = f.resolver.get_claim("email", TokenKind::IdToken).await.unwrap();
        assert_eq!(claim.value, Some(json!("api@example.com")));

        let flag = f.resolver.get_boolean_flag("dark_mode", None).await.unwrap();
        assert_eq!(flag.value, FlagValue::Bool(false));
        assert_eq!(f.api.calls(), 4);

        // Claims without an API equivalent still come from the token
        let claim = f.resolver.get_claim("sub", TokenKind::AccessToken).await.unwrap();
        assert_eq!(claim.value, Some(json!("kp_123")));
    }

    #[tokio::test]
    async fn per_call_override_beats_instance_default() {
        let api = FakeAccountApi {
            roles: vec![RoleRecord::from_key("api-role")],
            ..Default::default()
        };
        let f = fixture(access_claims(), None, api, false).await;
        let roles = f.resolver.get_roles(Some(true)).await.unwrap();
        assert_eq!(roles, vec![RoleRecord::from_key("api-role")]);
        assert_eq!(f.api.calls(), 1);
    }

    #[tokio::test]
    async fn api_failure_surfaces_as_api_error() {
        let f = fixture(access_claims(), None, FakeAccountApi::failing(), true).await;
        let err = f.resolver.get_permissions(None).await.unwrap_err();
        assert!(matches!(err, Error::Api(ref m) if m.contains("500")), "got: {err:?}");
    }

    #[tokio::test]
    async fn tampered_token_fails_verification() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let forged = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            serde_json::to_vec(&json!({"sub": "attacker", "exp": clock::unix_secs() + 60}))
                .unwrap(),
        );
        let stored = f.resolver.storage.token().await.unwrap();
        let mut parts: Vec<&str> = stored.tokens.access_token.split('.').collect();
        parts[1] = &forged;
        let mut tampered = stored.clone();
        tampered.tokens.access_token = parts.join(".");
        f.resolver
            .storage
            .set_token(&tampered, Expiry::Session)
            .await
            .unwrap();

        let err = f.resolver.get_claims(TokenKind::AccessToken).await.unwrap_err();
        assert!(matches!(err, Error::Verification(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn expired_token_fails_verification() {
        let f = fixture(
            json!({"sub": "kp_123", "exp": clock::unix_secs() - 3600}),
            None,
            FakeAccountApi::default(),
            false,
        )
        .await;
        let err = f.resolver.get_claims(TokenKind::AccessToken).await.unwrap_err();
        assert!(matches!(err, Error::Verification(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn symmetric_tokens_are_rejected() {
        let f = fixture(access_claims(), None, FakeAccountApi::default(), false).await;
        let hs = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &json!({"sub": "x", "exp": clock::unix_secs() + 60}),
            &jsonwebtoken::EncodingKey::from_secret(b"shared"),
        )
        .unwrap();
        let err = f.resolver.verify(&hs).await.unwrap_err();
        assert!(err.to_string().contains("symmetric"), "got: {err}");
    }
}
