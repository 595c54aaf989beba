//! TOML file loading shared by the client crates

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Read `path` and deserialize it as TOML into `T`.
///
/// Validation of the resulting values is the caller's job; this only
/// guarantees the file exists and is well-formed.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Err(Error::Config(format!("{} is empty", path.display())));
    }
    Ok(toml::from_str(&contents)?)
}
