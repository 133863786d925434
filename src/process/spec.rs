// src/process/spec.rs

//! Declarative description of a process to run and its command-line
//! rendering.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::{ProcmuxError, Result};
use crate::platform::PlatformCapabilities;

use super::escape::escape_argument;

/// Descriptor the sigchild wrapper writes the exit code to.
pub const EXIT_CODE_FD: i32 = 3;

/// Workarounds applied when spawning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompatFlags {
    /// Wrap the command for `cmd.exe`.
    pub windows_shim: bool,
    /// Capture the exit code through descriptor 3.
    pub sigchild: bool,
    /// Capture stdout through a temp file instead of a pipe.
    pub file_stdout: bool,
    /// Attach the child to the terminal and detach right after spawn.
    pub tty: bool,
}

impl CompatFlags {
    /// Flags implied by the platform.
    pub fn from_capabilities(caps: &PlatformCapabilities) -> Self {
        Self {
            windows_shim: caps.is_windows(),
            sigchild: caps.is_sigchild_build(),
            file_stdout: caps.needs_file_stdout(),
            tty: false,
        }
    }
}

/// Options passed through to the OS spawn call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Start the child in its own process group; signals target the group.
    pub new_process_group: bool,
    /// Leave stdin open after the initial input so more can be written.
    pub keep_stdin_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Shell command text; inserted verbatim.
    pub command: String,
    /// Positional arguments, escaped.
    pub args: Vec<String>,
    /// Named arguments rendered as `name=value` with the value escaped.
    pub named_args: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Variables set on top of (or instead of) the parent environment.
    pub env: BTreeMap<String, String>,
    pub inherit_env: bool,
    pub options: SpawnOptions,
    pub compat: CompatFlags,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            named_args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            inherit_env: true,
            options: SpawnOptions::default(),
            compat: CompatFlags::default(),
        }
    }

    /// Reject specs that can never run.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(ProcmuxError::ConfigError(
                "process command must not be empty".to_string(),
            ));
        }

        for (name, _) in &self.named_args {
            if name.is_empty() || name.contains(char::is_whitespace) || name.contains('=') {
                return Err(ProcmuxError::ConfigError(format!(
                    "invalid named argument '{name}': names must be non-empty without whitespace or '='"
                )));
            }
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(ProcmuxError::ConfigError(format!(
                    "invalid environment variable name '{key}'"
                )));
            }
        }

        if let Some(cwd) = &self.cwd {
            if !cwd.is_dir() {
                return Err(ProcmuxError::ConfigError(format!(
                    "working directory {:?} does not exist or is not a directory",
                    cwd
                )));
            }
        }

        if self.compat.windows_shim && self.compat.sigchild {
            return Err(ProcmuxError::ConfigError(
                "the sigchild wrapper is POSIX-only and cannot be combined with the Windows shim"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Command text followed by escaped arguments, without any shim.
    pub fn base_command_line(&self, caps: &PlatformCapabilities) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&escape_argument(arg, caps));
        }
        for (name, value) in &self.named_args {
            line.push(' ');
            line.push_str(name);
            line.push('=');
            line.push_str(&escape_argument(value, caps));
        }
        line
    }

    /// Full command line as handed to the shell, shims applied.
    pub fn command_line(&self, caps: &PlatformCapabilities) -> String {
        let base = self.base_command_line(caps);
        if self.compat.windows_shim {
            windows_wrap(&base)
        } else if self.compat.sigchild {
            sigchild_wrap(&base)
        } else {
            base
        }
    }
}

/// `cmd /V:ON /E:ON /C "..."`: delayed expansion and command extensions on.
pub fn windows_wrap(command: &str) -> String {
    format!("cmd /V:ON /E:ON /C \"{command}\"")
}

/// Run `command` in a subshell and report its status on descriptor 3.
///
/// The subshell sees descriptor 3 as `/dev/null` so the command itself cannot
/// write to the status channel.
pub fn sigchild_wrap(command: &str) -> String {
    format!("({command}) {EXIT_CODE_FD}>/dev/null; code=$?; echo $code >&{EXIT_CODE_FD}; exit $code")
}
