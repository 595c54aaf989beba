//! Protocol constants for the Kinde identity provider
//!
//! Endpoint paths are appended to the configured domain. Durations are the
//! defaults `ClientConfig` falls back to when the caller does not set them.

/// Authorization endpoint (browser redirect target)
pub const AUTHORIZE_PATH: &str = "/oauth2/auth";

/// Token endpoint for code, refresh and client-credentials exchanges
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Logout endpoint; takes a `redirect` query parameter
pub const LOGOUT_PATH: &str = "/logout";

/// Public signing keys used to verify issued JWTs
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Header identifying this SDK to the token endpoint
pub const SDK_HEADER: &str = "Kinde-SDK";

pub const SDK_VERSION: &str = concat!("Rust/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_SCOPES: &str = "openid profile email offline";

/// Lifetime of a persistent session (29 days).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 2_505_600;

pub const DEFAULT_JWKS_TTL_SECS: u64 = 3_600;

/// How long a CSRF state / PKCE verifier survives waiting for the callback.
pub const AUTH_STATE_TTL_SECS: u64 = 3_600;

pub const DEFAULT_STORAGE_PREFIX: &str = "kinde";

/// Authorize-time parameters a caller may add to the redirect.
pub const ALLOWED_ADDITIONAL_PARAMETERS: &[&str] = &[
    "audience",
    "org_code",
    "org_name",
    "is_create_org",
    "prompt",
    "redirect_uri",
    "lang",
    "login_hint",
    "connection_id",
    "plan_interest",
    "pricing_table_key",
    "has_success_page",
];
