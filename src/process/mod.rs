// src/process/mod.rs

//! Spawning OS processes, multiplexing their pipes and collecting results.

pub mod builder;
pub mod escape;
pub mod exit_codes;
pub mod handle;
pub(crate) mod pipes;
pub mod result;
pub mod spec;

use std::time::Duration;

pub use builder::ProcessBuilder;
pub use handle::{ProcessHandle, ProcessState};
pub use result::{ProcessResult, StreamKind, UNKNOWN_EXIT_CODE};
pub use spec::{CompatFlags, ProcessSpec, SpawnOptions};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Tunables for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSettings {
    /// Wall-clock budget measured from process start. `None` disables it.
    pub timeout: Option<Duration>,
    /// How long `stop` waits for a voluntary exit before force-killing.
    pub stop_grace: Duration,
    /// Upper bound on a single blocking poll in the read/write loops.
    pub poll_interval: Duration,
    /// Largest chunk written to stdin or read from a pipe per step.
    pub chunk_size: usize,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            timeout: None,
            stop_grace: DEFAULT_STOP_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
