//! Single entry point wiring every component from one configuration and one
//! storage handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use kinde_api::{
    AccountApi, EntitlementRecord, FlagType, FlagValue, HttpAccountApi, PermissionSet, RoleRecord,
};
use kinde_auth::{
    Claim, ClaimResolver, ClientConfig, Error, FeatureFlag, FlowOrchestrator, FlowState, JwksCache,
    LoginOutcome, Organization, PermissionGrant, Result, TokenKind, TokenSet, TokenStorage,
    UserDetails, UserOrganizations,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::condition::{Condition, ForceApi, HasConditions, PermissionContext};
use crate::entitlements::EntitlementPager;
use crate::evaluator::AuthorizationEvaluator;

pub struct KindeClient {
    flow: FlowOrchestrator,
    claims: Arc<ClaimResolver>,
    entitlements: Arc<EntitlementPager>,
    evaluator: AuthorizationEvaluator,
}

impl KindeClient {
    /// Client talking to the account API of the configured domain.
    ///
    /// `storage` must use the configured storage prefix.
    pub fn new(config: ClientConfig, storage: TokenStorage) -> Result<Self> {
        let http = reqwest::Client::new();
        let api = Arc::new(HttpAccountApi::new(config.domain(), http.clone()));
        Self::with_api(config, storage, http, api)
    }

    /// Client with process-local storage under the configured prefix.
    pub fn in_memory(config: ClientConfig) -> Result<Self> {
        let storage = TokenStorage::in_memory(config.storage_prefix());
        Self::new(config, storage)
    }

    /// Build from `KINDE_*` environment variables, with in-memory storage.
    pub fn from_env() -> Result<Self> {
        Self::in_memory(ClientConfig::from_env()?)
    }

    /// Client with a caller-supplied account API.
    pub fn with_api(
        config: ClientConfig,
        storage: TokenStorage,
        http: reqwest::Client,
        api: Arc<dyn AccountApi>,
    ) -> Result<Self> {
        if storage.prefix() != config.storage_prefix() {
            return Err(Error::Configuration(format!(
                "storage prefix '{}' does not match configured prefix '{}'",
                storage.prefix(),
                config.storage_prefix()
            )));
        }

        let jwks = Arc::new(JwksCache::from_config(&config, http.clone(), storage.clone()));
        let claims = Arc::new(ClaimResolver::new(
            storage.clone(),
            jwks,
            api.clone(),
            config.force_api(),
        ));
        let entitlements = Arc::new(EntitlementPager::new(storage.clone(), api));
        let evaluator = AuthorizationEvaluator::new(claims.clone(), entitlements.clone());
        info!(
            domain = config.domain(),
            grant = %config.grant_type(),
            force_api = config.force_api(),
            "kinde client initialized"
        );
        Ok(Self {
            flow: FlowOrchestrator::new(config, storage, http),
            claims,
            entitlements,
            evaluator,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.flow.config()
    }

    pub fn storage(&self) -> &TokenStorage {
        self.flow.storage()
    }

    pub fn claims(&self) -> &ClaimResolver {
        &self.claims
    }

    pub fn evaluator(&self) -> &AuthorizationEvaluator {
        &self.evaluator
    }

    pub fn entitlements(&self) -> &EntitlementPager {
        &self.entitlements
    }

    // --- flows ---

    pub async fn login(&self, params: &BTreeMap<String, String>) -> Result<LoginOutcome> {
        self.flow.login(params).await
    }

    pub async fn register(&self, params: &BTreeMap<String, String>) -> Result<LoginOutcome> {
        self.flow.register(params).await
    }

    pub async fn create_org(&self, params: &BTreeMap<String, String>) -> Result<LoginOutcome> {
        self.flow.create_org(params).await
    }

    pub async fn get_token(&self, callback_url: &str) -> Result<TokenSet> {
        self.flow.get_token(callback_url).await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.flow.is_authenticated().await
    }

    pub async fn refresh_token(&self) -> Result<TokenSet> {
        self.flow.refresh_token().await
    }

    pub async fn logout(&self) -> Result<String> {
        self.flow.logout().await
    }

    pub async fn flow_state(&self) -> FlowState {
        self.flow.state().await
    }

    // --- claims ---

    pub async fn get_claims(&self, kind: TokenKind) -> Result<Map<String, Value>> {
        self.claims.get_claims(kind).await
    }

    pub async fn get_claim(&self, name: &str, kind: TokenKind) -> Result<Claim> {
        self.claims.get_claim(name, kind).await
    }

    pub async fn get_flag(
        &self,
        code: &str,
        default: Option<FlagValue>,
        flag_type: Option<FlagType>,
    ) -> Result<FeatureFlag> {
        self.claims.get_flag(code, default, flag_type).await
    }

    pub async fn get_boolean_flag(&self, code: &str, default: Option<bool>) -> Result<FeatureFlag> {
        self.claims.get_boolean_flag(code, default).await
    }

    pub async fn get_string_flag(&self, code: &str, default: Option<&str>) -> Result<FeatureFlag> {
        self.claims.get_string_flag(code, default).await
    }

    pub async fn get_integer_flag(&self, code: &str, default: Option<i64>) -> Result<FeatureFlag> {
        self.claims.get_integer_flag(code, default).await
    }

    pub async fn get_user_details(&self) -> Result<UserDetails> {
        self.claims.get_user_details().await
    }

    pub async fn get_organization(&self) -> Result<Organization> {
        self.claims.get_organization().await
    }

    pub async fn get_user_organizations(&self) -> Result<UserOrganizations> {
        self.claims.get_user_organizations().await
    }

    pub async fn get_permission(&self, key: &str) -> Result<PermissionGrant> {
        self.claims.get_permission(key).await
    }

    pub async fn get_permissions(&self) -> Result<PermissionSet> {
        self.claims.get_permissions(None).await
    }

    pub async fn get_roles(&self) -> Result<Vec<RoleRecord>> {
        self.claims.get_roles(None).await
    }

    // --- entitlements ---

    pub async fn get_all_entitlements(&self) -> Result<Vec<EntitlementRecord>> {
        self.entitlements.get_all_entitlements().await
    }

    pub async fn get_entitlement(&self, key: &str) -> Result<Option<EntitlementRecord>> {
        self.entitlements.get_entitlement(key).await
    }

    pub async fn has_entitlement(&self, key: &str) -> Result<bool> {
        self.entitlements.has_entitlement(key).await
    }

    pub async fn get_entitlement_limit(&self, key: &str) -> Result<Option<i64>> {
        self.entitlements.get_entitlement_limit(key).await
    }

    // --- authorization ---

    pub async fn has_roles(
        &self,
        conditions: &[Condition<RoleRecord>],
        force_api: Option<bool>,
    ) -> bool {
        self.evaluator.has_roles(conditions, force_api).await
    }

    pub async fn has_permissions(
        &self,
        conditions: &[Condition<PermissionContext>],
        force_api: Option<bool>,
    ) -> bool {
        self.evaluator.has_permissions(conditions, force_api).await
    }

    pub async fn has_feature_flags(
        &self,
        conditions: &[Condition<FeatureFlag>],
        force_api: Option<bool>,
    ) -> bool {
        self.evaluator.has_feature_flags(conditions, force_api).await
    }

    pub async fn has_billing_entitlements(
        &self,
        conditions: &[Condition<EntitlementRecord>],
    ) -> bool {
        self.evaluator.has_billing_entitlements(conditions).await
    }

    pub async fn has(&self, conditions: &HasConditions, force_api: ForceApi) -> bool {
        self.evaluator.has(conditions, force_api).await
    }
}
