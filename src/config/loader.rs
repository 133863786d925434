// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::model::ConfigFile;
use crate::errors::ProcmuxError;
use crate::config::validate::validate_config;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "PROCMUX_CONFIG";

/// Read and deserialize a config file. No semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {:?}", path))?;

    let config: ConfigFile = toml::from_str(&contents)
        .map_err(ProcmuxError::from)
        .with_context(|| format!("parsing TOML config from {:?}", path))?;

    Ok(config)
}

/// Load a config file and check that every value is usable.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let config = load_from_path(path)?;
    validate_config(&config).with_context(|| format!("validating config {:?}", path))?;
    Ok(config)
}

/// Config path from `PROCMUX_CONFIG`, if set.
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
