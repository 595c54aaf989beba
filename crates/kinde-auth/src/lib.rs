//! Kinde OAuth2/OIDC client core
//!
//! Runs login flows against a Kinde identity provider, keeps the resulting
//! tokens in client-held storage, and reads verified claims from them. The
//! authorization predicates built on top live in `kinde-authz`.
//!
//! Login flow:
//! 1. `FlowOrchestrator::login()` stores a CSRF state (plus a PKCE verifier)
//!    and returns the authorize redirect
//! 2. The provider redirects back; `FlowOrchestrator::get_token()` checks
//!    the state and exchanges the code
//! 3. The token set lands in `TokenStorage` with a lifetime chosen by its
//!    `ksp.persistent` claim
//! 4. `FlowOrchestrator::is_authenticated()` refreshes an expired access
//!    token when a refresh token is available
//! 5. `ClaimResolver` verifies tokens against the cached JWKS before
//!    reading any claim

pub mod claims;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod flow;
pub mod jwks;
pub mod pkce;
pub mod session;
pub mod storage;
pub mod token;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use claims::{
    Claim, ClaimResolver, FeatureFlag, Organization, PermissionGrant, TokenKind, UserDetails,
    UserOrganizations,
};
pub use config::{ClientConfig, ClientSettings, GrantType};
pub use error::{Error, Result};
pub use flow::{FlowOrchestrator, FlowState, LoginOutcome};
pub use jwks::JwksCache;
pub use storage::{Expiry, StoredToken, TokenStorage};
pub use token::TokenSet;
