//! Login flow orchestration
//!
//! Phases:
//! 1. `Unauthenticated`: nothing in flight
//! 2. `Redirecting`: authorize URL handed to the caller, CSRF state stored
//! 3. `PendingCallback`: callback received, exchange under way
//! 4. `Authenticated` or `Failed`
//!
//! `handle_event` is the pure transition function; the orchestrator applies
//! the returned `FlowAction` to storage. Grant-specific behavior sits behind
//! the `AuthFlow` trait, with one implementation per grant selected once at
//! construction.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use reqwest::Url;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::{ClientConfig, GrantType, validate_additional_parameters};
use crate::constants::AUTH_STATE_TTL_SECS;
use crate::error::{Error, Result};
use crate::pkce::AuthState;
use crate::session;
use crate::storage::{Expiry, StoredToken, TokenStorage};
use crate::token::{self, TokenSet};

/// Phase of the current login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Unauthenticated,
    Redirecting,
    PendingCallback,
    Authenticated,
    Failed,
}

/// Events that drive phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    /// Authorize URL returned to the caller
    RedirectIssued,
    /// Provider redirected back to the callback URL
    CallbackReceived,
    /// A token set was obtained and stored
    TokenIssued,
    /// The callback exchange failed
    ExchangeFailed,
    /// Logout
    SignedOut,
}

/// Storage work the caller performs after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    /// Delete the CSRF state and PKCE verifier
    ClearAuthState,
    /// Delete everything under the storage prefix
    ClearStorage,
    None,
}

/// Handle a phase transition. Pure function: no I/O.
pub fn handle_event(state: FlowState, event: FlowEvent) -> (FlowState, FlowAction) {
    use FlowState::*;

    match (state, event) {
        (_, FlowEvent::SignedOut) => (Unauthenticated, FlowAction::ClearStorage),

        // A new login may start from any settled phase
        (Unauthenticated | Authenticated | Failed | Redirecting, FlowEvent::RedirectIssued) => {
            (Redirecting, FlowAction::None)
        }

        // The login may have begun on another orchestrator sharing the
        // storage, so a callback is accepted from every phase
        (_, FlowEvent::CallbackReceived) => (PendingCallback, FlowAction::None),

        // Callback exchange, client credentials, or refresh
        (PendingCallback, FlowEvent::TokenIssued) => (Authenticated, FlowAction::ClearAuthState),
        (Unauthenticated | Authenticated | Failed, FlowEvent::TokenIssued) => {
            (Authenticated, FlowAction::None)
        }

        (PendingCallback, FlowEvent::ExchangeFailed) => (Failed, FlowAction::ClearAuthState),

        // Invalid/unhandled transition: stay in current phase
        (state, _event) => (state, FlowAction::None),
    }
}

/// Result of starting a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Send the user agent to this authorize URL
    Redirect(String),
    /// Tokens were issued directly (client credentials)
    Authenticated(TokenSet),
}

/// Query parameters of the provider's redirect back to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn parse(callback_url: &str) -> Result<Self> {
        let url = Url::parse(callback_url)
            .map_err(|e| Error::OAuth(format!("invalid callback URL: {e}")))?;
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "state" => params.state = value,
                "code" => params.code = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        Ok(params)
    }
}

/// Everything a grant strategy needs: configuration, storage, transport.
#[derive(Clone)]
pub struct FlowContext {
    pub config: ClientConfig,
    pub storage: TokenStorage,
    pub http: reqwest::Client,
}

impl FlowContext {
    /// Persist `tokens` with the lifetime their `ksp.persistent` claim asks for.
    pub async fn store_tokens(&self, tokens: &TokenSet) -> Result<()> {
        let now = clock::unix_millis();
        let expiry = session::storage_expiry(
            &tokens.access_token,
            now / 1000,
            self.config.session_ttl(),
        );
        self.storage
            .set_token(&StoredToken::new(tokens.clone(), now), expiry)
            .await
    }
}

/// Boxed future returned by `AuthFlow` methods.
pub type FlowFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One OAuth grant.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility.
pub trait AuthFlow: Send + Sync {
    fn grant_type(&self) -> GrantType;

    /// Start a login. `params` are already merged and validated.
    fn begin_login<'a>(
        &'a self,
        ctx: &'a FlowContext,
        params: &'a BTreeMap<String, String>,
    ) -> FlowFuture<'a, LoginOutcome>;

    /// Validate the callback and exchange its code for tokens.
    fn exchange_callback<'a>(
        &'a self,
        ctx: &'a FlowContext,
        callback: &'a CallbackParams,
    ) -> FlowFuture<'a, TokenSet>;
}

/// Confidential-client authorization code grant.
pub struct AuthorizationCodeFlow;

/// Authorization code grant with PKCE.
pub struct PkceFlow;

/// Machine-to-machine grant.
pub struct ClientCredentialsFlow;

impl AuthFlow for AuthorizationCodeFlow {
    fn grant_type(&self) -> GrantType {
        GrantType::AuthorizationCode
    }

    fn begin_login<'a>(
        &'a self,
        ctx: &'a FlowContext,
        params: &'a BTreeMap<String, String>,
    ) -> FlowFuture<'a, LoginOutcome> {
        Box::pin(begin_redirect(ctx, params, false))
    }

    fn exchange_callback<'a>(
        &'a self,
        ctx: &'a FlowContext,
        callback: &'a CallbackParams,
    ) -> FlowFuture<'a, TokenSet> {
        Box::pin(async move {
            let code = validate_callback(ctx, callback).await?;
            let redirect_uri = exchange_redirect_uri(ctx).await?;
            token::exchange_code(&ctx.http, &ctx.config, &code, &redirect_uri, None).await
        })
    }
}

impl AuthFlow for PkceFlow {
    fn grant_type(&self) -> GrantType {
        GrantType::Pkce
    }

    fn begin_login<'a>(
        &'a self,
        ctx: &'a FlowContext,
        params: &'a BTreeMap<String, String>,
    ) -> FlowFuture<'a, LoginOutcome> {
        Box::pin(begin_redirect(ctx, params, true))
    }

    fn exchange_callback<'a>(
        &'a self,
        ctx: &'a FlowContext,
        callback: &'a CallbackParams,
    ) -> FlowFuture<'a, TokenSet> {
        Box::pin(async move {
            let code = validate_callback(ctx, callback).await?;
            let verifier = ctx.storage.code_verifier().await.ok_or_else(|| {
                Error::OAuth("no stored code verifier for the PKCE exchange".into())
            })?;
            let redirect_uri = exchange_redirect_uri(ctx).await?;
            token::exchange_code(&ctx.http, &ctx.config, &code, &redirect_uri, Some(&verifier))
                .await
        })
    }
}

impl AuthFlow for ClientCredentialsFlow {
    fn grant_type(&self) -> GrantType {
        GrantType::ClientCredentials
    }

    fn begin_login<'a>(
        &'a self,
        ctx: &'a FlowContext,
        params: &'a BTreeMap<String, String>,
    ) -> FlowFuture<'a, LoginOutcome> {
        Box::pin(async move {
            let tokens = token::client_credentials(&ctx.http, &ctx.config, params).await?;
            ctx.store_tokens(&tokens).await?;
            Ok(LoginOutcome::Authenticated(tokens))
        })
    }

    fn exchange_callback<'a>(
        &'a self,
        _ctx: &'a FlowContext,
        _callback: &'a CallbackParams,
    ) -> FlowFuture<'a, TokenSet> {
        Box::pin(async {
            Err(Error::Configuration(
                "the client_credentials grant has no authorization callback".into(),
            ))
        })
    }
}

/// The three grants, selected once from the configured grant type.
pub enum GrantFlow {
    AuthorizationCode(AuthorizationCodeFlow),
    Pkce(PkceFlow),
    ClientCredentials(ClientCredentialsFlow),
}

impl GrantFlow {
    pub fn for_grant(grant_type: GrantType) -> Self {
        match grant_type {
            GrantType::AuthorizationCode => GrantFlow::AuthorizationCode(AuthorizationCodeFlow),
            GrantType::Pkce => GrantFlow::Pkce(PkceFlow),
            GrantType::ClientCredentials => GrantFlow::ClientCredentials(ClientCredentialsFlow),
        }
    }

    fn as_flow(&self) -> &dyn AuthFlow {
        match self {
            GrantFlow::AuthorizationCode(flow) => flow,
            GrantFlow::Pkce(flow) => flow,
            GrantFlow::ClientCredentials(flow) => flow,
        }
    }
}

impl AuthFlow for GrantFlow {
    fn grant_type(&self) -> GrantType {
        self.as_flow().grant_type()
    }

    fn begin_login<'a>(
        &'a self,
        ctx: &'a FlowContext,
        params: &'a BTreeMap<String, String>,
    ) -> FlowFuture<'a, LoginOutcome> {
        self.as_flow().begin_login(ctx, params)
    }

    fn exchange_callback<'a>(
        &'a self,
        ctx: &'a FlowContext,
        callback: &'a CallbackParams,
    ) -> FlowFuture<'a, TokenSet> {
        self.as_flow().exchange_callback(ctx, callback)
    }
}

async fn begin_redirect(
    ctx: &FlowContext,
    params: &BTreeMap<String, String>,
    pkce: bool,
) -> Result<LoginOutcome> {
    ctx.storage.clear().await?;

    let auth_state = AuthState::generate(pkce);
    let expiry = Expiry::in_secs(AUTH_STATE_TTL_SECS);
    ctx.storage.set_state(&auth_state.state, expiry).await?;
    if let Some(verifier) = &auth_state.code_verifier {
        ctx.storage.set_code_verifier(verifier, expiry).await?;
    }
    let redirect_uri = params
        .get("redirect_uri")
        .map(String::as_str)
        .or(ctx.config.redirect_uri());
    if let Some(redirect_uri) = redirect_uri {
        ctx.storage.set_redirect_uri(redirect_uri, expiry).await?;
    }

    let url = authorize_url(&ctx.config, &auth_state, params)?;
    Ok(LoginOutcome::Redirect(url))
}

fn authorize_url(
    config: &ClientConfig,
    auth_state: &AuthState,
    params: &BTreeMap<String, String>,
) -> Result<String> {
    let mut query = BTreeMap::new();
    query.insert("client_id", config.client_id().to_owned());
    query.insert("response_type", "code".to_owned());
    query.insert("scope", config.scopes().to_owned());
    query.insert("state", auth_state.state.clone());
    if let Some(redirect_uri) = config.redirect_uri() {
        query.insert("redirect_uri", redirect_uri.to_owned());
    }
    if let Some(challenge) = &auth_state.code_challenge {
        query.insert("code_challenge", challenge.clone());
        query.insert("code_challenge_method", "S256".to_owned());
    }
    for (key, value) in params {
        query.insert(key.as_str(), value.clone());
    }

    let mut url = Url::parse(&config.endpoints().authorize)
        .map_err(|e| Error::Configuration(format!("invalid authorize endpoint: {e}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url.into())
}

/// Redirect URI the pending login sent, falling back to the configured one.
async fn exchange_redirect_uri(ctx: &FlowContext) -> Result<String> {
    if let Some(redirect_uri) = ctx.storage.redirect_uri().await {
        return Ok(redirect_uri);
    }
    ctx.config.redirect_uri().map(str::to_owned).ok_or_else(|| {
        Error::Configuration("redirect_uri is required to exchange an authorization code".into())
    })
}

/// Check the callback against the stored state and return its code.
async fn validate_callback(ctx: &FlowContext, callback: &CallbackParams) -> Result<String> {
    let stored = ctx.storage.state().await;
    match (stored.as_deref(), callback.state.as_deref()) {
        (Some(stored), Some(received)) if stored == received => {}
        _ => {
            warn!(
                stored = stored.is_some(),
                received = callback.state.is_some(),
                "callback state does not match stored state"
            );
            return Err(Error::OAuth("state validation failed".into()));
        }
    }

    if let Some(error) = &callback.error {
        let description = callback.error_description.as_deref().unwrap_or(error);
        return Err(Error::OAuth(format!("{error}: {description}")));
    }

    callback
        .code
        .clone()
        .filter(|code| !code.is_empty())
        .ok_or_else(|| Error::OAuth("callback has no authorization code".into()))
}

/// Runs logins and token exchanges, and tracks the current phase.
pub struct FlowOrchestrator {
    ctx: FlowContext,
    flow: GrantFlow,
    phase: Mutex<FlowState>,
}

impl FlowOrchestrator {
    pub fn new(config: ClientConfig, storage: TokenStorage, http: reqwest::Client) -> Self {
        let flow = GrantFlow::for_grant(config.grant_type());
        debug!(grant = %flow.grant_type(), "flow orchestrator ready");
        Self {
            ctx: FlowContext {
                config,
                storage,
                http,
            },
            flow,
            phase: Mutex::new(FlowState::Unauthenticated),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    pub fn storage(&self) -> &TokenStorage {
        &self.ctx.storage
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.ctx.http
    }

    pub async fn state(&self) -> FlowState {
        *self.phase.lock().await
    }

    /// Start a login.
    ///
    /// `params` are merged over the configured additional parameters and
    /// must be on the allow-list.
    pub async fn login(&self, params: &BTreeMap<String, String>) -> Result<LoginOutcome> {
        validate_additional_parameters(params)?;
        let mut merged = self.ctx.config.additional_parameters().clone();
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let outcome = self.flow.begin_login(&self.ctx, &merged).await?;
        match &outcome {
            LoginOutcome::Redirect(_) => {
                info!(grant = %self.flow.grant_type(), "login redirect issued");
                self.transition(FlowEvent::RedirectIssued).await?;
            }
            LoginOutcome::Authenticated(_) => {
                info!(grant = %self.flow.grant_type(), "token issued without redirect");
                self.transition(FlowEvent::TokenIssued).await?;
            }
        }
        Ok(outcome)
    }

    /// Login that lands on the sign-up screen.
    pub async fn register(&self, params: &BTreeMap<String, String>) -> Result<LoginOutcome> {
        self.require_redirect_grant("register")?;
        let mut params = params.clone();
        params.insert("prompt".into(), "create".into());
        self.login(&params).await
    }

    /// Sign-up that also creates an organization.
    pub async fn create_org(&self, params: &BTreeMap<String, String>) -> Result<LoginOutcome> {
        self.require_redirect_grant("create_org")?;
        let mut params = params.clone();
        params.insert("prompt".into(), "create".into());
        params.insert("is_create_org".into(), "true".into());
        self.login(&params).await
    }

    /// Complete a login from the provider's callback URL.
    ///
    /// An unexpired stored token set is returned without any network call.
    /// The stored CSRF state, PKCE verifier and redirect URI are consumed
    /// whether the exchange succeeds or fails, whatever phase this
    /// orchestrator was in.
    pub async fn get_token(&self, callback_url: &str) -> Result<TokenSet> {
        if self.flow.grant_type() == GrantType::ClientCredentials {
            return match self.login(&BTreeMap::new()).await? {
                LoginOutcome::Authenticated(tokens) => Ok(tokens),
                LoginOutcome::Redirect(_) => Err(Error::OAuth(
                    "client credentials login produced a redirect".into(),
                )),
            };
        }

        if let Some(stored) = self.ctx.storage.token().await
            && !stored.is_expired(clock::unix_millis())
        {
            debug!("returning unexpired stored token set");
            return Ok(stored.tokens);
        }

        self.transition(FlowEvent::CallbackReceived).await?;
        let result = match CallbackParams::parse(callback_url) {
            Ok(callback) => self.exchange(&callback).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(tokens) => {
                info!(grant = %self.flow.grant_type(), "authorization code exchanged");
                self.transition(FlowEvent::TokenIssued).await?;
                Ok(tokens)
            }
            Err(e) => {
                warn!(error = %e, "callback exchange failed");
                self.transition(FlowEvent::ExchangeFailed).await?;
                Err(e)
            }
        }
    }

    /// Whether a usable token set is stored, refreshing an expired one when
    /// a refresh token is available. Refresh failures read as `false`.
    pub async fn is_authenticated(&self) -> bool {
        let Some(stored) = self.ctx.storage.token().await else {
            return false;
        };
        if !stored.is_expired(clock::unix_millis()) {
            return true;
        }
        if stored.tokens.refresh_token.is_none() {
            debug!("access token expired and no refresh token is stored");
            return false;
        }
        match self.refresh_token().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                false
            }
        }
    }

    /// Exchange the stored refresh token for a new token set.
    ///
    /// A response without a refresh token keeps the old one.
    pub async fn refresh_token(&self) -> Result<TokenSet> {
        let stored = self
            .ctx
            .storage
            .token()
            .await
            .ok_or_else(|| Error::Token("no token set to refresh".into()))?;
        let refresh = stored
            .tokens
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Token("no refresh token available".into()))?;

        let mut tokens = token::refresh_token(&self.ctx.http, &self.ctx.config, &refresh).await?;
        if tokens.expires_in == 0 {
            return Err(Error::Token("refreshed access token has no lifetime".into()));
        }
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh);
        }

        self.ctx.store_tokens(&tokens).await?;
        info!(expires_in = tokens.expires_in, "access token refreshed");
        self.transition(FlowEvent::TokenIssued).await?;
        Ok(tokens)
    }

    /// Clear storage and return the provider's logout URL.
    pub async fn logout(&self) -> Result<String> {
        self.transition(FlowEvent::SignedOut).await?;

        let mut url = Url::parse(&self.ctx.config.endpoints().logout)
            .map_err(|e| Error::Configuration(format!("invalid logout endpoint: {e}")))?;
        if let Some(redirect) = self.ctx.config.logout_redirect_uri() {
            url.query_pairs_mut().append_pair("redirect", redirect);
        }
        info!("signed out");
        Ok(url.into())
    }

    async fn exchange(&self, callback: &CallbackParams) -> Result<TokenSet> {
        let tokens = self.flow.exchange_callback(&self.ctx, callback).await?;
        self.ctx.store_tokens(&tokens).await?;
        Ok(tokens)
    }

    async fn transition(&self, event: FlowEvent) -> Result<()> {
        let mut phase = self.phase.lock().await;
        let (next, action) = handle_event(*phase, event);
        debug!(from = ?*phase, to = ?next, event = ?event, "flow transition");
        *phase = next;
        drop(phase);

        match action {
            FlowAction::ClearAuthState => self.ctx.storage.clear_auth_state().await,
            FlowAction::ClearStorage => self.ctx.storage.clear().await,
            FlowAction::None => Ok(()),
        }
    }

    fn require_redirect_grant(&self, operation: &str) -> Result<()> {
        if self.flow.grant_type().uses_redirect() {
            return Ok(());
        }
        Err(Error::Configuration(format!(
            "{operation} requires a redirect grant, configured grant is {}",
            self.flow.grant_type()
        )))
    }
}
