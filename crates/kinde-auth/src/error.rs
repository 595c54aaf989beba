//! Error types for the Kinde client core

use kinde_api::{ApiError, FlagType};

/// Errors from configuration, login flows, token handling and claim lookups.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or missing configuration. Raised at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Protocol failure: state mismatch, provider-returned `error`, rejected exchange.
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Missing access token, or expired token with no usable refresh token.
    #[error("token error: {0}")]
    Token(String),

    #[error("feature flag '{code}' is of type {actual}, requested {requested}")]
    TypeMismatch {
        code: String,
        requested: FlagType,
        actual: FlagType,
    },

    /// Failure reported by the account API, with its original message.
    #[error("API error: {0}")]
    Api(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token verification failed: {0}")]
    Verification(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Error::Api(err.to_string())
    }
}

impl From<common::Error> for Error {
    fn from(err: common::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
