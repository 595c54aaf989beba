//! Client configuration
//!
//! `ClientSettings` holds raw values as they come from a TOML file, the
//! environment, or code. `ClientConfig::new` validates them once and yields
//! an immutable configuration; nothing downstream re-validates. Validation
//! does not care where the values came from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use common::Secret;
use reqwest::Url;
use serde::Deserialize;
use tracing::warn;

use crate::constants::{
    ALLOWED_ADDITIONAL_PARAMETERS, AUTHORIZE_PATH, DEFAULT_JWKS_TTL_SECS, DEFAULT_SCOPES,
    DEFAULT_SESSION_TTL_SECS, DEFAULT_STORAGE_PREFIX, JWKS_PATH, LOGOUT_PATH, TOKEN_PATH,
};
use crate::error::{Error, Result};

/// OAuth grant used to obtain tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    /// Authorization code with a confidential client secret
    AuthorizationCode,
    /// Authorization code with PKCE
    Pkce,
    /// Machine-to-machine, no user redirect
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Pkce => "authorization_code_flow_pkce",
            GrantType::ClientCredentials => "client_credentials",
        }
    }

    /// Whether the grant sends the user through the authorize redirect.
    pub fn uses_redirect(&self) -> bool {
        !matches!(self, GrantType::ClientCredentials)
    }
}

impl FromStr for GrantType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "authorization_code_flow_pkce" | "pkce" => Ok(GrantType::Pkce),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "" => Err(Error::Configuration("grant_type is required".into())),
            other => Err(Error::Configuration(format!(
                "unsupported grant_type '{other}', expected one of authorization_code, \
                 authorization_code_flow_pkce, client_credentials"
            ))),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw, unvalidated configuration values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub domain: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: Option<String>,
    pub logout_redirect_uri: Option<String>,
    pub grant_type: String,
    pub scopes: Option<String>,
    /// Overrides the scheme of `domain` (`http` or `https`)
    pub protocol: Option<String>,
    pub force_api: bool,
    pub additional_parameters: BTreeMap<String, String>,
    pub session_ttl_secs: Option<u64>,
    pub jwks_ttl_secs: Option<u64>,
    pub storage_prefix: Option<String>,
}

impl ClientSettings {
    /// Read settings from `KINDE_*` environment variables.
    ///
    /// Unset variables leave the field at its default; `ClientConfig::new`
    /// reports anything required that is still missing.
    pub fn from_env() -> Self {
        let mut settings = ClientSettings {
            domain: env_var("KINDE_DOMAIN")
                .or_else(|| env_var("KINDE_HOST"))
                .unwrap_or_default(),
            client_id: env_var("KINDE_CLIENT_ID").unwrap_or_default(),
            client_secret: Secret::new(env_var("KINDE_CLIENT_SECRET").unwrap_or_default()),
            redirect_uri: env_var("KINDE_REDIRECT_URL"),
            logout_redirect_uri: env_var("KINDE_LOGOUT_REDIRECT_URL"),
            grant_type: env_var("KINDE_GRANT_TYPE").unwrap_or_default(),
            scopes: env_var("KINDE_SCOPES"),
            protocol: env_var("KINDE_PROTOCOL"),
            ..Default::default()
        };

        if let Some(raw) = env_var("KINDE_FORCE_API") {
            settings.force_api = match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    warn!(value = %raw, "ignoring unrecognized KINDE_FORCE_API value");
                    false
                }
            };
        }
        if let Some(audience) = env_var("KINDE_AUDIENCE") {
            settings
                .additional_parameters
                .insert("audience".into(), audience);
        }
        settings
    }

    /// Read settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(common::load_toml(path)?)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Absolute URLs derived from the configured domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub logout: String,
    pub jwks: String,
}

impl Endpoints {
    fn for_domain(domain: &str) -> Self {
        Self {
            authorize: format!("{domain}{AUTHORIZE_PATH}"),
            token: format!("{domain}{TOKEN_PATH}"),
            logout: format!("{domain}{LOGOUT_PATH}"),
            jwks: format!("{domain}{JWKS_PATH}"),
        }
    }
}

/// Validated, immutable client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    domain: String,
    client_id: String,
    client_secret: Secret<String>,
    redirect_uri: Option<String>,
    logout_redirect_uri: Option<String>,
    grant_type: GrantType,
    scopes: String,
    additional_parameters: BTreeMap<String, String>,
    force_api: bool,
    session_ttl: Duration,
    jwks_ttl: Duration,
    storage_prefix: String,
    endpoints: Endpoints,
}

impl ClientConfig {
    /// Validate `settings`. Fails on the first missing or invalid field.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let grant_type: GrantType = settings.grant_type.parse()?;
        let domain = normalize_domain(&settings.domain, settings.protocol.as_deref())?;

        let client_id = settings.client_id.trim().to_owned();
        if client_id.is_empty() {
            return Err(Error::Configuration("client_id is required".into()));
        }

        // Public PKCE clients may omit the secret; confidential grants cannot.
        if grant_type != GrantType::Pkce && settings.client_secret.is_empty() {
            return Err(Error::Configuration(format!(
                "client_secret is required for the {grant_type} grant"
            )));
        }

        let redirect_uri = optional_url("redirect_uri", settings.redirect_uri.as_deref())?;
        let logout_redirect_uri =
            optional_url("logout_redirect_uri", settings.logout_redirect_uri.as_deref())?;
        if grant_type.uses_redirect() {
            if redirect_uri.is_none() {
                return Err(Error::Configuration(format!(
                    "redirect_uri is required for the {grant_type} grant"
                )));
            }
            if logout_redirect_uri.is_none() {
                return Err(Error::Configuration(format!(
                    "logout_redirect_uri is required for the {grant_type} grant"
                )));
            }
        }

        validate_additional_parameters(&settings.additional_parameters)?;

        let scopes = settings
            .scopes
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SCOPES.to_owned());

        let session_ttl = positive_secs(
            "session_ttl_secs",
            settings.session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS),
        )?;
        let jwks_ttl = positive_secs(
            "jwks_ttl_secs",
            settings.jwks_ttl_secs.unwrap_or(DEFAULT_JWKS_TTL_SECS),
        )?;

        let storage_prefix = settings
            .storage_prefix
            .unwrap_or_else(|| DEFAULT_STORAGE_PREFIX.to_owned());
        if storage_prefix.is_empty()
            || !storage_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Configuration(format!(
                "storage_prefix must be non-empty and alphanumeric, got '{storage_prefix}'"
            )));
        }

        Ok(Self {
            endpoints: Endpoints::for_domain(&domain),
            domain,
            client_id,
            client_secret: settings.client_secret,
            redirect_uri,
            logout_redirect_uri,
            grant_type,
            scopes,
            additional_parameters: settings.additional_parameters,
            force_api: settings.force_api,
            session_ttl,
            jwks_ttl,
            storage_prefix,
        })
    }

    /// Build from `KINDE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientSettings::from_env())
    }

    /// Build from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::new(ClientSettings::load(path)?)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &Secret<String> {
        &self.client_secret
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    pub fn logout_redirect_uri(&self) -> Option<&str> {
        self.logout_redirect_uri.as_deref()
    }

    pub fn grant_type(&self) -> GrantType {
        self.grant_type
    }

    pub fn scopes(&self) -> &str {
        &self.scopes
    }

    /// Parameters added to every authorize redirect.
    pub fn additional_parameters(&self) -> &BTreeMap<String, String> {
        &self.additional_parameters
    }

    pub fn force_api(&self) -> bool {
        self.force_api
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn jwks_ttl(&self) -> Duration {
        self.jwks_ttl
    }

    pub fn storage_prefix(&self) -> &str {
        &self.storage_prefix
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

/// Reject parameters outside the allow-list, and empty values.
pub fn validate_additional_parameters(params: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in params {
        if !ALLOWED_ADDITIONAL_PARAMETERS.contains(&key.as_str()) {
            return Err(Error::Configuration(format!(
                "additional parameter '{key}' is not allowed, expected one of: {}",
                ALLOWED_ADDITIONAL_PARAMETERS.join(", ")
            )));
        }
        if value.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "additional parameter '{key}' must not be empty"
            )));
        }
    }
    Ok(())
}

fn normalize_domain(raw: &str, protocol: Option<&str>) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Configuration("domain is required".into()));
    }
    let mut url = Url::parse(raw).map_err(|e| {
        Error::Configuration(format!("domain must be an absolute URL, got '{raw}': {e}"))
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::Configuration(format!(
            "domain must start with http:// or https://, got: {raw}"
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::Configuration(format!("domain has no host: {raw}")));
    }

    if let Some(protocol) = protocol.map(|p| p.trim().trim_end_matches("://")) {
        if protocol != "http" && protocol != "https" {
            return Err(Error::Configuration(format!(
                "protocol must be http or https, got '{protocol}'"
            )));
        }
        url.set_scheme(protocol).map_err(|()| {
            Error::Configuration(format!("cannot apply protocol '{protocol}' to {raw}"))
        })?;
    }

    Ok(url.as_str().trim_end_matches('/').to_owned())
}

fn optional_url(field: &str, raw: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    Url::parse(raw)
        .map_err(|e| Error::Configuration(format!("{field} must be an absolute URL: {e}")))?;
    Ok(Some(raw.to_owned()))
}

fn positive_secs(field: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::Configuration(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(Duration::from_secs(secs))
}
