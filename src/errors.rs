// src/errors.rs

//! Crate-wide error type and result alias.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::process::ProcessResult;

#[derive(Error, Debug)]
pub enum ProcmuxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Timeout(Box<TimeoutFailure>),

    #[error("the process has been signaled with signal {signal}")]
    SignaledTermination {
        signal: i32,
        result: Box<ProcessResult>,
    },

    #[error("process is not running: {0}")]
    ProcessNotRunning(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl ProcmuxError {
    /// Partial result carried by timeout and signal failures.
    pub fn partial_result(&self) -> Option<&ProcessResult> {
        match self {
            ProcmuxError::Timeout(failure) => Some(&failure.result),
            ProcmuxError::SignaledTermination { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// Blocking phase that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Write,
    Read,
    Wait,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeoutPhase::Write => "write",
            TimeoutPhase::Read => "read",
            TimeoutPhase::Wait => "wait",
        };
        f.write_str(name)
    }
}

/// Details of an expired timeout. The process has already been stopped when
/// this is returned.
#[derive(Error, Debug, Clone)]
#[error("process `{}` exceeded the {phase} timeout of {timeout:?} ({bytes_written} input bytes written)", .result.command_line())]
pub struct TimeoutFailure {
    pub phase: TimeoutPhase,
    pub timeout: Duration,
    pub bytes_written: usize,
    pub result: ProcessResult,
}

impl TimeoutFailure {
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

pub type Result<T> = std::result::Result<T, ProcmuxError>;
