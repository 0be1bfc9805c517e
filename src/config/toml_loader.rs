//! TOML configuration file parsing.
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::{DotError, Result};

/// Deserialize a TOML file into `T`.
///
/// A missing file yields the value an empty document deserializes to, so
/// every field of `T` must have a default.
///
/// # Errors
///
/// Returns [`DotError::Config`] if the file cannot be read or parsed.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        // An empty document gives every field its default.
        return parse("", path);
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        DotError::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    parse(&content, path)
}

/// Deserialize TOML text; `origin` names the source in error messages.
///
/// # Errors
///
/// Returns [`DotError::Config`] describing the parse failure.
pub fn parse<T: DeserializeOwned>(content: &str, origin: &Path) -> Result<T> {
    toml::from_str(content).map_err(|e| {
        DotError::Config(format!(
            "failed to parse TOML config {}: {}",
            origin.display(),
            e.message()
        ))
    })
}
