//! Shared building blocks for the Kinde client crates

mod config;
mod error;
mod secret;

pub use config::load_toml;
pub use error::{Error, Result};
pub use secret::Secret;
