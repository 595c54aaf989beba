//! Account API collaborator for the Kinde client
//!
//! Defines the `AccountApi` trait through which the claim resolver and the
//! authorization evaluator reach the identity provider's account endpoints
//! when token claims are not enough (forced API mode, billing entitlements,
//! profile data). The trait keeps callers independent of the transport;
//! `HttpAccountApi` is the reqwest-backed implementation.
//!
//! Every method takes the bearer access token explicitly. The API client
//! holds no session state of its own.

pub mod http;
pub mod models;

pub use http::HttpAccountApi;
pub use models::{
    ApiFeatureFlag, EntitlementRecord, EntitlementsPage, FlagType, FlagValue, PermissionRecord,
    PermissionSet, RoleRecord, UserProfile,
};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Errors from account API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("account API request failed: {0}")]
    Http(String),

    #[error("account API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid account API response: {0}")]
    Decode(String),
}

/// Result alias for account API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Boxed future returned by `AccountApi` methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// The identity provider's account endpoints, consumed as a black box.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn AccountApi>`), so tests can substitute in-memory fakes.
pub trait AccountApi: Send + Sync {
    /// Feature flags for the current user, keyed by flag code.
    fn feature_flags<'a>(
        &'a self,
        access_token: &'a str,
    ) -> ApiFuture<'a, HashMap<String, ApiFeatureFlag>>;

    /// Permissions granted in the current organization.
    fn permissions<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, PermissionSet>;

    /// Roles assigned in the current organization.
    fn roles<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, Vec<RoleRecord>>;

    /// One page of billing entitlements.
    ///
    /// `starting_after` is the cursor returned by the previous page; `None`
    /// requests the first page.
    fn entitlements<'a>(
        &'a self,
        access_token: &'a str,
        starting_after: Option<&'a str>,
        page_size: Option<u32>,
    ) -> ApiFuture<'a, EntitlementsPage>;

    /// Profile of the signed-in user.
    fn user_profile<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, UserProfile>;
}
