//! Errors raised while reading configuration sources

use std::path::PathBuf;

use thiserror::Error;

/// Failure to read or parse a configuration source.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_the_path() {
        let err = Error::Io {
            path: PathBuf::from("/etc/kinde.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/kinde.toml"), "got: {msg}");
        assert!(msg.contains("missing"), "got: {msg}");
    }

    #[test]
    fn config_error_display() {
        let err = Error::Config("domain is required".into());
        assert_eq!(err.to_string(), "configuration error: domain is required");
    }
}
