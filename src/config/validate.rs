// src/config/validate.rs

use crate::config::model::ConfigFile;
use crate::errors::{ProcmuxError, Result};

/// Semantic checks on a loaded configuration.
///
/// - every duration parses (`ms`, `s`, `m`, `h`)
/// - `poll_interval > 0` and `chunk_size >= 1`
/// - the reactor backend name is known
/// - the shell override, if any, is not blank
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_execution(cfg)?;
    validate_platform(cfg)?;
    cfg.loop_backend()?;
    Ok(())
}

fn validate_execution(cfg: &ConfigFile) -> Result<()> {
    let settings = cfg.exec_settings()?;

    if settings.poll_interval.is_zero() {
        return Err(ProcmuxError::ConfigError(
            "[execution].poll_interval must be greater than zero".to_string(),
        ));
    }

    if settings.chunk_size == 0 {
        return Err(ProcmuxError::ConfigError(
            "[execution].chunk_size must be >= 1 (got 0)".to_string(),
        ));
    }

    if settings.timeout.is_some_and(|timeout| timeout.is_zero()) {
        return Err(ProcmuxError::ConfigError(
            "[execution].timeout must be greater than zero; omit it to disable".to_string(),
        ));
    }

    Ok(())
}

fn validate_platform(cfg: &ConfigFile) -> Result<()> {
    if let Some(shell) = &cfg.platform.shell {
        if shell.trim().is_empty() {
            return Err(ProcmuxError::ConfigError(
                "[platform].shell must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}
