//! Token endpoint exchanges
//!
//! Three grants POST a form to `{domain}/oauth2/token`:
//! 1. Authorization code (optionally with a PKCE verifier)
//! 2. Refresh token
//! 3. Client credentials
//!
//! Responses are fully parsed before anything is returned, so callers never
//! persist a partial token set.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::constants::{SDK_HEADER, SDK_VERSION};
use crate::error::{Error, Result};

/// Tokens returned by the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time; `StoredToken`
/// pins it to an absolute instant when the set is persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Exchange an authorization code for tokens.
///
/// `redirect_uri` must be the exact value sent to the authorize endpoint.
/// `verifier` is the stored PKCE code verifier; `None` for the plain
/// authorization code grant.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &ClientConfig,
    code: &str,
    redirect_uri: &str,
    verifier: Option<&str>,
) -> Result<TokenSet> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("client_id", config.client_id()),
        ("redirect_uri", redirect_uri),
        ("code", code),
    ];
    if !config.client_secret().is_empty() {
        form.push(("client_secret", config.client_secret().expose().as_str()));
    }
    if let Some(verifier) = verifier {
        form.push(("code_verifier", verifier));
    }

    post_token_form(client, config, &form).await
}

/// Obtain a fresh access token using a refresh token.
///
/// 400/401/403 from the endpoint means the refresh token is no longer
/// usable and maps to `Error::Token`.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &ClientConfig,
    refresh: &str,
) -> Result<TokenSet> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("client_id", config.client_id()),
        ("refresh_token", refresh),
    ];
    if !config.client_secret().is_empty() {
        form.push(("client_secret", config.client_secret().expose().as_str()));
    }

    match post_token_form(client, config, &form).await {
        Err(Error::OAuth(msg)) if is_rejection(&msg) => Err(Error::Token(format!(
            "refresh token rejected: {msg}"
        ))),
        other => other,
    }
}

/// Machine-to-machine token; no user involvement.
///
/// Only `audience` is forwarded from `extra`; the other allow-listed
/// parameters apply to the authorize redirect.
pub async fn client_credentials(
    client: &reqwest::Client,
    config: &ClientConfig,
    extra: &BTreeMap<String, String>,
) -> Result<TokenSet> {
    let mut form = vec![
        ("grant_type", "client_credentials"),
        ("client_id", config.client_id()),
        ("client_secret", config.client_secret().expose().as_str()),
        ("scope", config.scopes()),
    ];
    if let Some(audience) = extra.get("audience") {
        form.push(("audience", audience.as_str()));
    }

    post_token_form(client, config, &form).await
}

async fn post_token_form(
    client: &reqwest::Client,
    config: &ClientConfig,
    form: &[(&str, &str)],
) -> Result<TokenSet> {
    let grant = form
        .iter()
        .find(|(k, _)| *k == "grant_type")
        .map(|(_, v)| *v)
        .unwrap_or_default();
    debug!(grant, endpoint = %config.endpoints().token, "requesting token");

    let response = client
        .post(&config.endpoints().token)
        .header(SDK_HEADER, SDK_VERSION)
        .form(form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::OAuth(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let tokens = response
        .json::<TokenSet>()
        .await
        .map_err(|e| Error::OAuth(format!("invalid token response: {e}")))?;
    if tokens.access_token.is_empty() {
        return Err(Error::OAuth("token response has an empty access_token".into()));
    }
    Ok(tokens)
}

fn is_rejection(msg: &str) -> bool {
    ["returned 400", "returned 401", "returned 403"]
        .iter()
        .any(|code| msg.contains(code))
}
