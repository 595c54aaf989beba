//! reqwest-backed account API client
//!
//! Talks to `{domain}/account_api/v1/*` and `{domain}/oauth2/v2/user_profile`
//! with the caller's bearer token. Responses arrive wrapped in a
//! `{data, metadata}` envelope; this module unwraps them into the normalized
//! records from `models`.

use std::collections::HashMap;

use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::{
    ApiFeatureFlag, EntitlementRecord, EntitlementsPage, FlagType, FlagValue, PermissionRecord,
    PermissionSet, RoleRecord, UserProfile,
};
use crate::{AccountApi, ApiError, ApiFuture, Result};

const ACCOUNT_API_PREFIX: &str = "/account_api/v1";
const USER_PROFILE_PATH: &str = "/oauth2/v2/user_profile";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page_starting_after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlagsData {
    #[serde(default)]
    feature_flags: Vec<WireFlag>,
}

#[derive(Debug, Deserialize)]
struct WireFlag {
    key: String,
    #[serde(rename = "type")]
    flag_type: FlagType,
    value: FlagValue,
}

#[derive(Debug, Deserialize)]
struct PermissionsData {
    #[serde(default)]
    org_code: Option<String>,
    #[serde(default)]
    permissions: Vec<PermissionRecord>,
}

#[derive(Debug, Deserialize)]
struct RolesData {
    #[serde(default)]
    roles: Vec<RoleRecord>,
}

#[derive(Debug, Deserialize)]
struct EntitlementsData {
    #[serde(default)]
    entitlements: Vec<WireEntitlement>,
}

#[derive(Debug, Deserialize)]
struct WireEntitlement {
    #[serde(default)]
    id: Option<String>,
    feature_key: String,
    #[serde(default)]
    feature_name: Option<String>,
    #[serde(default)]
    entitlement_limit_max: Option<i64>,
    #[serde(default)]
    entitlement_limit_min: Option<i64>,
    #[serde(default)]
    price_name: Option<String>,
    #[serde(default)]
    unit_amount: Option<i64>,
    #[serde(default)]
    fixed_charge: Option<i64>,
}

impl From<WireEntitlement> for EntitlementRecord {
    fn from(wire: WireEntitlement) -> Self {
        EntitlementRecord {
            id: wire.id,
            name: wire.feature_name.unwrap_or_else(|| wire.feature_key.clone()),
            key: wire.feature_key,
            limit_max: wire.entitlement_limit_max,
            limit_min: wire.entitlement_limit_min,
            price_name: wire.price_name,
            unit_amount: wire.unit_amount,
            fixed_charge: wire.fixed_charge,
        }
    }
}

/// Account API client over HTTP.
pub struct HttpAccountApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAccountApi {
    /// `base_url` is the identity provider domain, e.g. `https://acme.kinde.com`.
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client }
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|e| ApiError::Http(format!("invalid account API url: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, access_token: &str) -> Result<T> {
        debug!(path = url.path(), "calling account API");
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl AccountApi for HttpAccountApi {
    fn feature_flags<'a>(
        &'a self,
        access_token: &'a str,
    ) -> ApiFuture<'a, HashMap<String, ApiFeatureFlag>> {
        Box::pin(async move {
            let url = self.url(&format!("{ACCOUNT_API_PREFIX}/feature_flags"))?;
            let envelope: Envelope<FlagsData> = self.get_json(url, access_token).await?;
            Ok(envelope
                .data
                .feature_flags
                .into_iter()
                .map(|f| {
                    (
                        f.key,
                        ApiFeatureFlag {
                            value: f.value,
                            flag_type: f.flag_type,
                        },
                    )
                })
                .collect())
        })
    }

    fn permissions<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, PermissionSet> {
        Box::pin(async move {
            let url = self.url(&format!("{ACCOUNT_API_PREFIX}/permissions"))?;
            let envelope: Envelope<PermissionsData> = self.get_json(url, access_token).await?;
            Ok(PermissionSet {
                org_code: envelope.data.org_code,
                permissions: envelope.data.permissions,
            })
        })
    }

    fn roles<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, Vec<RoleRecord>> {
        Box::pin(async move {
            let url = self.url(&format!("{ACCOUNT_API_PREFIX}/roles"))?;
            let envelope: Envelope<RolesData> = self.get_json(url, access_token).await?;
            Ok(envelope.data.roles)
        })
    }

    fn entitlements<'a>(
        &'a self,
        access_token: &'a str,
        starting_after: Option<&'a str>,
        page_size: Option<u32>,
    ) -> ApiFuture<'a, EntitlementsPage> {
        Box::pin(async move {
            let mut url = self.url(&format!("{ACCOUNT_API_PREFIX}/entitlements"))?;
            {
                let mut query = url.query_pairs_mut();
                if let Some(size) = page_size {
                    query.append_pair("page_size", &size.to_string());
                }
                if let Some(cursor) = starting_after {
                    query.append_pair("starting_after", cursor);
                }
            }
            // An empty query_pairs_mut leaves a dangling '?'
            if url.query() == Some("") {
                url.set_query(None);
            }

            let envelope: Envelope<EntitlementsData> = self.get_json(url, access_token).await?;
            Ok(EntitlementsPage {
                entitlements: envelope
                    .data
                    .entitlements
                    .into_iter()
                    .map(EntitlementRecord::from)
                    .collect(),
                has_more: envelope.metadata.has_more,
                next_cursor: envelope.metadata.next_page_starting_after,
            })
        })
    }

    fn user_profile<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, UserProfile> {
        Box::pin(async move {
            let url = self.url(USER_PROFILE_PATH)?;
            self.get_json(url, access_token).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn api_for(server: &MockServer) -> HttpAccountApi {
        HttpAccountApi::new(format!("{}/", server.uri()), reqwest::Client::new())
    }

    #[tokio::test]
    async fn feature_flags_are_keyed_by_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account_api/v1/feature_flags"))
            .and(header("authorization", "Bearer at_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "feature_flags": [
                        {"id": "f1", "name": "Dark mode", "key": "dark_mode", "type": "boolean", "value": true},
                        {"id": "f2", "name": "Theme", "key": "theme", "type": "string", "value": "pink"}
                    ]
                },
                "metadata": {"has_more": false}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let flags = api_for(&server).await.feature_flags("at_1").await.unwrap();
        assert_eq!(flags.len(), 2);
        assert_eq!(flags["dark_mode"].value, FlagValue::Bool(true));
        assert_eq!(flags["theme"].flag_type, FlagType::String);
    }

    #[tokio::test]
    async fn permissions_carry_org_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account_api/v1/permissions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "org_code": "org_123",
                    "permissions": [{"id": "p1", "key": "read:users", "name": "Read users"}]
                }
            })))
            .mount(&server)
            .await;

        let set = api_for(&server).await.permissions("at").await.unwrap();
        assert_eq!(set.org_code.as_deref(), Some("org_123"));
        assert!(set.contains("read:users"));
    }

    #[tokio::test]
    async fn entitlements_forward_cursor_and_map_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account_api/v1/entitlements"))
            .and(query_param("starting_after", "ent_1"))
            .and(query_param("page_size", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "org_code": "org_123",
                    "entitlements": [{
                        "id": "ent_2",
                        "feature_key": "seats",
                        "feature_name": "Seats",
                        "entitlement_limit_max": 10,
                        "entitlement_limit_min": 1
                    }]
                },
                "metadata": {"has_more": true, "next_page_starting_after": "ent_2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = api_for(&server)
            .await
            .entitlements("at", Some("ent_1"), Some(10))
            .await
            .unwrap();
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("ent_2"));
        assert_eq!(page.entitlements[0].key, "seats");
        assert_eq!(page.entitlements[0].name, "Seats");
        assert_eq!(page.entitlements[0].limit_max, Some(10));
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account_api/v1/roles"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = api_for(&server).await.roles("at").await.unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn user_profile_is_unwrapped_directly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth2/v2/user_profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "kp_1",
                "given_name": "Ada",
                "email": "ada@example.com"
            })))
            .mount(&server)
            .await;

        let profile = api_for(&server).await.user_profile("at").await.unwrap();
        assert_eq!(profile.id.as_deref(), Some("kp_1"));
        assert_eq!(profile.given_name.as_deref(), Some("Ada"));
        assert!(profile.family_name.is_none());
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account_api/v1/roles"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = api_for(&server).await.roles("at").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
