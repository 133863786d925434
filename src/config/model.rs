// src/config/model.rs

use std::str::FromStr;

use serde::Deserialize;

use crate::config::duration::parse_duration;
use crate::errors::{ProcmuxError, Result};
use crate::platform::PlatformCapabilities;
use crate::process::{ExecSettings, DEFAULT_CHUNK_SIZE};
use crate::reactor::LoopBackend;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [execution]
/// timeout = "30s"
/// stop_grace = "10s"
/// poll_interval = "200ms"
/// chunk_size = 16384
///
/// [platform]
/// sigchild = false
/// file_stdout = false
/// shell = "sh"
///
/// [reactor]
/// backend = "auto"
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub execution: ExecutionSection,

    #[serde(default)]
    pub platform: PlatformSection,

    #[serde(default)]
    pub reactor: ReactorSection,
}

/// `[execution]` section. Durations are strings with a unit (`ms`, `s`,
/// `m`, `h`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSection {
    /// Default wall-clock budget per process; absent means no timeout.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Grace period `stop()` waits before force-killing.
    #[serde(default = "default_stop_grace")]
    pub stop_grace: String,

    /// Upper bound on one blocking poll in the pipe loops.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Maximum bytes written to stdin or read from a pipe per step.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_stop_grace() -> String {
    "10s".to_string()
}

fn default_poll_interval() -> String {
    "200ms".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            timeout: None,
            stop_grace: default_stop_grace(),
            poll_interval: default_poll_interval(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// `[platform]` section: overrides on top of the detected capabilities.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformSection {
    /// Force the exit-code-through-descriptor-3 shim.
    #[serde(default)]
    pub sigchild: Option<bool>,

    /// Force temp-file stdout capture.
    #[serde(default)]
    pub file_stdout: Option<bool>,

    /// Shell used to run command lines on POSIX.
    #[serde(default)]
    pub shell: Option<String>,
}

/// `[reactor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactorSection {
    /// `"auto"`, `"select"` or `"native"`.
    #[serde(default = "default_backend")]
    pub backend: String,
}

fn default_backend() -> String {
    "auto".to_string()
}

impl Default for ReactorSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

impl ConfigFile {
    /// Runtime settings described by `[execution]`.
    pub fn exec_settings(&self) -> Result<ExecSettings> {
        let exec = &self.execution;
        let timeout = exec
            .timeout
            .as_deref()
            .map(|value| parse_field("execution.timeout", value))
            .transpose()?;

        Ok(ExecSettings {
            timeout,
            stop_grace: parse_field("execution.stop_grace", &exec.stop_grace)?,
            poll_interval: parse_field("execution.poll_interval", &exec.poll_interval)?,
            chunk_size: exec.chunk_size,
        })
    }

    /// `base` with the `[platform]` overrides applied.
    pub fn capabilities(&self, base: PlatformCapabilities) -> PlatformCapabilities {
        let mut caps = base;
        if let Some(sigchild) = self.platform.sigchild {
            caps = caps.with_sigchild(sigchild);
        }
        if let Some(file_stdout) = self.platform.file_stdout {
            caps = caps.with_file_stdout(file_stdout);
        }
        if let Some(shell) = &self.platform.shell {
            caps = caps.with_shell(shell.clone());
        }
        caps
    }

    /// Backend requested by `[reactor]`.
    pub fn loop_backend(&self) -> Result<LoopBackend> {
        LoopBackend::from_str(&self.reactor.backend).map_err(|e| {
            ProcmuxError::ConfigError(format!("invalid [reactor].backend: {e}"))
        })
    }
}

fn parse_field(field: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value)
        .map_err(|e| ProcmuxError::ConfigError(format!("invalid [{field}]: {e}")))
}
