#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use procmux::platform::PlatformCapabilities;
use procmux::process::{ExecSettings, ProcessBuilder};

/// POSIX capabilities with the shim flags off, independent of the host
/// environment.
pub fn posix_caps() -> Arc<PlatformCapabilities> {
    Arc::new(PlatformCapabilities::posix())
}

/// Settings with a short poll slice so tests react quickly.
pub fn fast_settings() -> ExecSettings {
    ExecSettings {
        poll_interval: Duration::from_millis(20),
        stop_grace: Duration::from_millis(500),
        ..ExecSettings::default()
    }
}

/// Builder for a shell snippet under [`posix_caps`] and [`fast_settings`].
pub fn shell(command: &str) -> ProcessBuilder {
    ProcessBuilder::new(command, posix_caps()).settings(fast_settings())
}

/// Same as [`shell`] with the sigchild shim on.
pub fn sigchild_shell(command: &str) -> ProcessBuilder {
    shell(command).sigchild(true)
}

/// Same as [`shell`] with temp-file stdout capture.
pub fn file_stdout_shell(command: &str) -> ProcessBuilder {
    shell(command).file_stdout(true)
}

/// Command that ignores SIGTERM and keeps running.
pub const TERM_IGNORING: &str = "trap '' TERM; while true; do sleep 0.05; done";

/// Command that never reads its stdin.
pub const NEVER_READS: &str = "exec sleep 5";
