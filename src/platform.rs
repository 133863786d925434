// src/platform.rs

//! Platform capability probe.
//!
//! Everything the process and reactor layers need to know about the host is
//! computed once by [`PlatformCapabilities::detect`] and then passed around
//! as an immutable value. Tests and the config layer derive variants with the
//! `with_*` methods instead of mutating shared state.

use std::collections::BTreeSet;
use std::io::IsTerminal;

use tracing::debug;

/// Environment variable that forces the sigchild shim on (`1`/`true`).
pub const SIGCHILD_ENV: &str = "PROCMUX_SIGCHILD";

/// Shells probed on `PATH` during detection.
const KNOWN_SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "cmd", "powershell", "pwsh"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Unix,
    Windows,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCapabilities {
    os_family: OsFamily,
    native_events: bool,
    sigchild_broken: bool,
    file_stdout: bool,
    tty: bool,
    shells: BTreeSet<String>,
    default_shell: String,
}

impl PlatformCapabilities {
    /// Probe the running host.
    pub fn detect() -> Self {
        let os_family = if cfg!(windows) {
            OsFamily::Windows
        } else {
            OsFamily::Unix
        };

        let shells: BTreeSet<String> = KNOWN_SHELLS
            .iter()
            .filter(|name| which::which(name).is_ok())
            .map(|name| name.to_string())
            .collect();

        let sigchild_broken = std::env::var(SIGCHILD_ENV)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let caps = Self {
            os_family,
            native_events: cfg!(target_os = "linux"),
            sigchild_broken,
            file_stdout: os_family == OsFamily::Windows,
            tty: std::io::stdin().is_terminal() && std::io::stdout().is_terminal(),
            shells,
            default_shell: default_shell_for(os_family).to_string(),
        };

        debug!(?caps, "detected platform capabilities");
        caps
    }

    /// A fixed POSIX profile with no optional features, independent of the
    /// host. Useful when rendering command lines deterministically.
    pub fn posix() -> Self {
        Self {
            os_family: OsFamily::Unix,
            native_events: false,
            sigchild_broken: false,
            file_stdout: false,
            tty: false,
            shells: BTreeSet::from(["sh".to_string()]),
            default_shell: "sh".to_string(),
        }
    }

    /// A fixed Windows profile, used to render `cmd` command lines.
    pub fn windows() -> Self {
        Self {
            os_family: OsFamily::Windows,
            native_events: false,
            sigchild_broken: false,
            file_stdout: true,
            tty: false,
            shells: BTreeSet::from(["cmd".to_string()]),
            default_shell: "cmd".to_string(),
        }
    }

    pub fn os_family(&self) -> OsFamily {
        self.os_family
    }

    pub fn is_windows(&self) -> bool {
        self.os_family == OsFamily::Windows
    }

    /// Whether an epoll-style readiness backend can be used.
    pub fn has_native_events(&self) -> bool {
        self.native_events
    }

    /// Whether the runtime cannot report child exit statuses directly.
    pub fn is_sigchild_build(&self) -> bool {
        self.sigchild_broken
    }

    /// Whether stdout must be captured through a temp file instead of a pipe.
    pub fn needs_file_stdout(&self) -> bool {
        self.file_stdout
    }

    pub fn has_tty(&self) -> bool {
        self.tty
    }

    pub fn has_shell(&self, name: &str) -> bool {
        self.shells.contains(name)
    }

    /// Shell used to interpret command lines on POSIX.
    pub fn shell(&self) -> &str {
        &self.default_shell
    }

    pub fn with_sigchild(mut self, broken: bool) -> Self {
        self.sigchild_broken = broken;
        self
    }

    pub fn with_native_events(mut self, available: bool) -> Self {
        // Never claim a backend the build cannot provide.
        self.native_events = available && cfg!(target_os = "linux");
        self
    }

    pub fn with_file_stdout(mut self, enabled: bool) -> Self {
        self.file_stdout = enabled;
        self
    }

    pub fn with_tty(mut self, available: bool) -> Self {
        self.tty = available;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        let shell = shell.into();
        self.shells.insert(shell.clone());
        self.default_shell = shell;
        self
    }
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self::detect()
    }
}

fn default_shell_for(family: OsFamily) -> &'static str {
    match family {
        OsFamily::Unix => "sh",
        OsFamily::Windows => "cmd",
    }
}
