// src/config/loader.rs

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::model::Config;
use crate::config::validate::validate_config;

/// Read and parse a config file without semantic validation.
///
/// Use [`load_and_validate`] for the real entry point; this exists so tests
/// can inspect configs that deliberately fail validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading config file at {path:?}"))?;

    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing YAML config from {path:?}"))?;

    Ok(config)
}

/// Load a config file and run full validation, including the `which` probe
/// for every configured binary.
pub async fn load_and_validate(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config = load_from_path(path)?;
    validate_config(&config)
        .await
        .with_context(|| format!("invalid config {path:?}"))?;
    Ok(config)
}
