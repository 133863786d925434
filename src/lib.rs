// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod logging;
pub mod platform;
pub mod process;
pub mod reactor;

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, parse_duration, ConfigFile};
use crate::errors::ProcmuxError;
use crate::platform::PlatformCapabilities;
use crate::process::{ProcessBuilder, StreamKind, UNKNOWN_EXIT_CODE};

pub use crate::errors::Result as ProcmuxResult;
pub use crate::platform::OsFamily;
pub use crate::process::{ExecSettings, ProcessHandle, ProcessResult, ProcessSpec, ProcessState};
pub use crate::reactor::{create_loop, EventLoop, LoopBackend};

/// Exit status reported when the process ran out of time.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// High-level entry point used by `main.rs`.
///
/// Loads config, resolves platform capabilities, then runs the command to
/// completion while streaming its output. Returns the exit code to report.
pub fn run(args: CliArgs) -> Result<i32> {
    let cfg = match args
        .config
        .clone()
        .or_else(config::loader::config_path_from_env)
    {
        Some(path) => load_and_validate(&path)?,
        None => ConfigFile::default(),
    };

    let mut caps = cfg.capabilities(PlatformCapabilities::detect());
    if args.sigchild {
        caps = caps.with_sigchild(true);
    }
    if args.file_stdout {
        caps = caps.with_file_stdout(true);
    }
    let caps = Arc::new(caps);

    let mut settings = cfg.exec_settings()?;
    if let Some(raw) = &args.timeout {
        let timeout = parse_duration(raw)
            .map_err(|e| anyhow!(e))
            .context("invalid --timeout")?;
        settings.timeout = Some(timeout);
    }

    let (command, rest) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow!("no command given"))?;
    let builder = ProcessBuilder::new(command.clone(), Arc::clone(&caps))
        .args(rest.iter().cloned())
        .settings(settings);

    if args.dry_run {
        print_dry_run(&builder, &cfg, &caps)?;
        return Ok(0);
    }

    let input = args.input.unwrap_or_default();
    let outcome = builder.execute(input.as_bytes(), stream_to_terminal, None);

    match outcome {
        Ok(result) => {
            let code = result.code().unwrap_or(UNKNOWN_EXIT_CODE);
            info!(code, text = result.code_text().unwrap_or("Unknown error"), "command finished");
            Ok(if code < 0 { 1 } else { code })
        }
        Err(ProcmuxError::Timeout(failure)) => {
            warn!(error = %failure, "command timed out");
            Ok(TIMEOUT_EXIT_CODE)
        }
        Err(ProcmuxError::SignaledTermination { signal, .. }) => {
            warn!(signal, "command was killed by a signal");
            Ok(128 + signal)
        }
        Err(err) => Err(err.into()),
    }
}

/// Output callback for the binary: stdout to stdout, stderr to stderr.
fn stream_to_terminal(kind: StreamKind, bytes: &[u8]) {
    let written = match kind {
        StreamKind::Stdout => {
            let mut out = std::io::stdout().lock();
            out.write_all(bytes).and_then(|()| out.flush())
        }
        StreamKind::Stderr => {
            let mut err = std::io::stderr().lock();
            err.write_all(bytes).and_then(|()| err.flush())
        }
    };
    if let Err(e) = written {
        debug!(stream = %kind, error = %e, "failed to forward output to terminal");
    }
}

fn print_dry_run(builder: &ProcessBuilder, cfg: &ConfigFile, caps: &PlatformCapabilities) -> Result<()> {
    let backend = cfg.loop_backend()?;
    let event_loop = create_loop(caps, backend)?;
    let settings = builder.exec_settings();

    println!("procmux dry-run");
    println!("  command: {}", builder.command_line()?);
    println!("  shell: {}", caps.shell());
    println!("  sigchild: {}", caps.is_sigchild_build());
    println!("  file_stdout: {}", caps.needs_file_stdout());
    println!("  timeout: {:?}", settings.timeout);
    println!("  stop_grace: {:?}", settings.stop_grace);
    println!("  reactor backend: {}", event_loop.backend());

    debug!("dry-run complete (no execution)");
    Ok(())
}
