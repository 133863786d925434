// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `procmux`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "procmux",
    version,
    about = "Run a command with multiplexed pipes, timeouts and structured exit codes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Falls back to `PROCMUX_CONFIG`, then to built-in defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Wall-clock timeout for the process (e.g. "500ms", "30s", "2m").
    #[arg(long, value_name = "DUR")]
    pub timeout: Option<String>,

    /// Text written to the process's stdin.
    #[arg(long, value_name = "TEXT")]
    pub input: Option<String>,

    /// Capture the exit code through descriptor 3.
    #[arg(long)]
    pub sigchild: bool,

    /// Capture stdout through a temp file instead of a pipe.
    #[arg(long)]
    pub file_stdout: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROCMUX_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the rendered command line and exit without running it.
    #[arg(long)]
    pub dry_run: bool,

    /// Command followed by its arguments; arguments are escaped.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
