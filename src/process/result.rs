// src/process/result.rs

//! Captured output and exit code of one process.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::errors::ProcmuxError;

use super::exit_codes;

/// Exit code meaning "not yet determined".
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Which output stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("out"),
            StreamKind::Stderr => f.write_str("err"),
        }
    }
}

impl FromStr for StreamKind {
    type Err = ProcmuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "out" | "stdout" => Ok(StreamKind::Stdout),
            "err" | "stderr" => Ok(StreamKind::Stderr),
            other => Err(ProcmuxError::ConfigError(format!(
                "unknown output stream type '{other}' (expected \"out\" or \"err\")"
            ))),
        }
    }
}

/// Output buffers, exit code and completion flags for one process.
///
/// A [`ProcessHandle`](super::ProcessHandle) is the only writer; callers
/// read it through the handle while the process runs, or own it once
/// execution finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    command_line: String,
    output: Vec<u8>,
    errors: Vec<u8>,
    code: Option<i32>,
    started: bool,
    running: bool,
    output_offset: usize,
    errors_offset: usize,
}

impl ProcessResult {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            ..Self::default()
        }
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Append a chunk to the buffer for `kind`.
    pub fn accumulate(&mut self, kind: StreamKind, bytes: &[u8]) {
        match kind {
            StreamKind::Stdout => self.output.extend_from_slice(bytes),
            StreamKind::Stderr => self.errors.extend_from_slice(bytes),
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn errors(&self) -> &[u8] {
        &self.errors
    }

    pub fn output_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    pub fn errors_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.errors)
    }

    /// Output captured since the previous call.
    pub fn latest_output(&mut self) -> &[u8] {
        let start = self.output_offset;
        self.output_offset = self.output.len();
        &self.output[start..]
    }

    /// Error output captured since the previous call.
    pub fn latest_errors(&mut self) -> &[u8] {
        let start = self.errors_offset;
        self.errors_offset = self.errors.len();
        &self.errors[start..]
    }

    /// Record an exit code. A real code, once set, is never replaced.
    pub fn set_code(&mut self, code: i32) {
        match self.code {
            None | Some(UNKNOWN_EXIT_CODE) => self.code = Some(code),
            Some(_) => {}
        }
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Description of the exit code; `None` until a code is known.
    pub fn code_text(&self) -> Option<&'static str> {
        self.code.map(exit_codes::describe_or_unknown)
    }

    pub(crate) fn mark_started(&mut self) {
        self.started = true;
        self.running = true;
    }

    pub(crate) fn mark_finished(&mut self) {
        self.running = false;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_complete(&self) -> bool {
        self.started && !self.running
    }

    pub fn is_successful(&self) -> bool {
        self.is_complete() && self.code == Some(0)
    }
}
