// src/process/handle.rs

//! A spawned OS process and its blocking I/O loops.

use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::errors::{ProcmuxError, Result, TimeoutFailure, TimeoutPhase};
use crate::platform::PlatformCapabilities;
use crate::reactor::mux::set_cloexec;

use super::pipes::{configure_stdio, Chunk, PipeSource, ProcessPipes};
use super::result::{ProcessResult, StreamKind, UNKNOWN_EXIT_CODE};
use super::spec::{ProcessSpec, EXIT_CODE_FD};
use super::ExecSettings;

/// Upper bound for reaping a child after it was force-killed.
const KILL_REAP_LIMIT: Duration = Duration::from_secs(5);
const MIN_REAP_SLEEP: Duration = Duration::from_millis(1);

/// Lifecycle of a [`ProcessHandle`].
///
/// `Ready -> Started -> Terminated`, with `Paused` only reachable from
/// `Started` and left again through `resume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Started,
    Paused,
    Terminated,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Ready => "ready",
            ProcessState::Started => "started",
            ProcessState::Paused => "paused",
            ProcessState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Owns one spawned process: its pipes, state and captured result.
pub struct ProcessHandle {
    spec: ProcessSpec,
    command_line: String,
    caps: Arc<PlatformCapabilities>,
    settings: ExecSettings,
    state: ProcessState,
    child: Option<Child>,
    /// TTY-mode child; only reaped, never signalled.
    detached: Option<Child>,
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
    pipes: ProcessPipes,
    exit_code_report: Vec<u8>,
    last_signal: Option<i32>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    bytes_written: usize,
    result: ProcessResult,
}

impl ProcessHandle {
    pub fn new(spec: ProcessSpec, caps: Arc<PlatformCapabilities>, settings: ExecSettings) -> Self {
        let command_line = spec.command_line(&caps);
        let pipes = ProcessPipes::new(settings.poll_interval, settings.chunk_size);
        Self {
            result: ProcessResult::new(command_line.clone()),
            spec,
            command_line,
            caps,
            settings,
            state: ProcessState::Ready,
            child: None,
            detached: None,
            pid: None,
            exit_status: None,
            pipes,
            exit_code_report: Vec::new(),
            last_signal: None,
            started_at: None,
            stopped_at: None,
            bytes_written: 0,
        }
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.settings.timeout
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<Instant> {
        self.stopped_at
    }

    /// Total bytes written to stdin so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Result as captured so far, without draining the pipes.
    pub fn result(&self) -> &ProcessResult {
        &self.result
    }

    pub fn into_result(mut self) -> ProcessResult {
        std::mem::take(&mut self.result)
    }

    /// Process id. Not available under the sigchild shim.
    pub fn pid(&self) -> Result<Option<u32>> {
        if self.spec.compat.sigchild {
            return Err(ProcmuxError::Unsupported(
                "the process id is not available in sigchild compatibility mode".to_string(),
            ));
        }
        Ok(self.pid)
    }

    /// Spawn the process, flush `input` to its stdin and close it (unless
    /// `keep_stdin_open` was requested).
    pub fn start<F>(&mut self, input: &[u8], mut on_output: F) -> Result<()>
    where
        F: FnMut(StreamKind, &[u8]),
    {
        if self.state != ProcessState::Ready {
            return Err(ProcmuxError::Unsupported(format!(
                "process `{}` has already been started (state: {})",
                self.command_line, self.state
            )));
        }
        self.spec.validate()?;

        let mut command = self.build_command();

        if self.spec.compat.tty {
            return self.start_detached_tty(command);
        }

        let stdout_file = configure_stdio(&mut command, self.spec.compat.file_stdout)?;

        // The write end must stay open until spawn returns; the child gets a
        // copy on descriptor 3.
        let exit_code_pipe = if self.spec.compat.sigchild {
            Some(exit_code_pipe(&mut command)?)
        } else {
            None
        };

        let mut child = command.spawn().map_err(|source| ProcmuxError::SpawnFailure {
            command: self.command_line.clone(),
            source,
        })?;

        let exit_code_reader = exit_code_pipe.map(|(reader, writer)| {
            drop(writer);
            File::from(reader)
        });

        let pid = child.id();
        self.pipes.attach(
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
            exit_code_reader,
            stdout_file,
        )?;

        self.child = Some(child);
        self.pid = Some(pid);
        self.state = ProcessState::Started;
        self.started_at = Some(Instant::now());
        self.result.mark_started();

        info!(
            pid,
            command = %self.command_line,
            timeout = ?self.settings.timeout,
            "process started"
        );

        self.write(input, &mut on_output)?;
        if !self.spec.options.keep_stdin_open {
            self.pipes.close_stdin();
        }
        Ok(())
    }

    fn start_detached_tty(&mut self, mut command: Command) -> Result<()> {
        if !self.caps.has_tty() {
            return Err(ProcmuxError::Unsupported(
                "TTY mode requires an attached terminal".to_string(),
            ));
        }
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let child = command.spawn().map_err(|source| ProcmuxError::SpawnFailure {
            command: self.command_line.clone(),
            source,
        })?;

        info!(pid = child.id(), command = %self.command_line, "process started in TTY mode; detaching");
        self.pid = Some(child.id());
        self.detached = Some(child);
        self.started_at = Some(Instant::now());
        self.stopped_at = self.started_at;
        self.result.mark_started();
        self.result.set_code(UNKNOWN_EXIT_CODE);
        self.result.mark_finished();
        self.state = ProcessState::Terminated;
        Ok(())
    }

    fn build_command(&self) -> Command {
        let mut command = if self.spec.compat.windows_shim {
            let mut command = Command::new("cmd");
            command
                .args(["/V:ON", "/E:ON", "/C"])
                .arg(self.spec.base_command_line(&self.caps));
            command
        } else {
            let mut command = Command::new(self.caps.shell());
            command.arg("-c").arg(&self.command_line);
            command
        };

        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }
        if !self.spec.inherit_env {
            command.env_clear();
        }
        command.envs(&self.spec.env);

        if self.owns_process_group() {
            unsafe {
                command.pre_exec(|| {
                    if libc::setpgid(0, 0) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        command
    }

    /// Write `data` to stdin, draining output while the pipe is full.
    ///
    /// Returns the number of bytes written; fewer than `data.len()` only if
    /// the process closed its stdin.
    pub fn write<F>(&mut self, data: &[u8], mut on_output: F) -> Result<usize>
    where
        F: FnMut(StreamKind, &[u8]),
    {
        self.ensure_active("write")?;
        if data.is_empty() {
            return Ok(0);
        }
        if !self.pipes.has_stdin() {
            return Err(ProcmuxError::ProcessNotRunning(format!(
                "stdin of `{}` is closed",
                self.command_line
            )));
        }

        let mut offset = 0;
        while offset < data.len() {
            self.check_timeout(TimeoutPhase::Write)?;
            let running = self.refresh_status()?;
            let (written, stdin_closed) = self.pump(&data[offset..], true, !running, &mut on_output)?;
            offset += written;

            if stdin_closed || !self.pipes.has_stdin() {
                debug!(
                    pid = self.pid,
                    remaining = data.len() - offset,
                    "stdin closed by the process; dropping remaining input"
                );
                break;
            }
        }
        Ok(offset)
    }

    /// Close stdin so the process sees EOF.
    pub fn close_input(&mut self) {
        self.pipes.close_stdin();
    }

    /// Drain stdout/stderr until every output backend is exhausted.
    pub fn read<F>(&mut self, mut on_output: F) -> Result<()>
    where
        F: FnMut(StreamKind, &[u8]),
    {
        self.read_inner(&mut on_output)
    }

    fn read_inner(&mut self, on_output: &mut dyn FnMut(StreamKind, &[u8])) -> Result<()> {
        if self.state == ProcessState::Ready {
            return Err(self.not_started("read"));
        }
        while self.pipes.has_open_readers() {
            let running = self.refresh_status()?;
            self.check_timeout(TimeoutPhase::Read)?;
            self.pump(&[], true, !running, on_output)?;
        }
        Ok(())
    }

    /// Read everything, reap the process and finalize the exit code.
    pub fn wait<F>(&mut self, mut on_output: F) -> Result<i32>
    where
        F: FnMut(StreamKind, &[u8]),
    {
        match self.state {
            ProcessState::Ready => return Err(self.not_started("wait")),
            ProcessState::Terminated => return Ok(self.final_code()),
            ProcessState::Started | ProcessState::Paused => {}
        }

        self.read_inner(&mut on_output)?;

        let mut sleep = MIN_REAP_SLEEP;
        while self.refresh_status()? {
            self.check_timeout(TimeoutPhase::Wait)?;
            std::thread::sleep(sleep);
            sleep = (sleep * 2).min(self.settings.poll_interval);
        }

        self.finalize(true)
    }

    /// Terminate the process: SIGTERM, up to `grace` for a voluntary exit,
    /// then `signal` (SIGKILL by default) if it is still running.
    pub fn stop(&mut self, grace: Duration, signal: Option<i32>) -> Result<i32> {
        match self.state {
            ProcessState::Ready => return Err(self.not_started("stop")),
            ProcessState::Terminated => return Ok(self.final_code()),
            ProcessState::Started | ProcessState::Paused => {}
        }

        if self.refresh_status()? {
            info!(pid = self.pid, ?grace, "stopping process");
            self.send_signal(Signal::SIGTERM as i32)?;
            if self.state == ProcessState::Paused {
                self.send_signal(Signal::SIGCONT as i32)?;
                self.state = ProcessState::Started;
            }

            let deadline = Instant::now() + grace;
            let mut sleep = MIN_REAP_SLEEP;
            while self.refresh_status()? && Instant::now() < deadline {
                self.pump(&[], false, false, &mut |_, _| {})?;
                let remaining = deadline.saturating_duration_since(Instant::now());
                std::thread::sleep(sleep.min(remaining));
                sleep = (sleep * 2).min(self.settings.poll_interval);
            }

            if self.refresh_status()? {
                let kill_with = signal.unwrap_or(Signal::SIGKILL as i32);
                warn!(pid = self.pid, signal = kill_with, "process still running after grace period; killing");
                self.send_signal(kill_with)?;
                self.reap_within(KILL_REAP_LIMIT)?;
            }
        }

        self.finalize(false)
    }

    /// Deliver an arbitrary signal.
    pub fn signal(&mut self, signal: i32) -> Result<()> {
        if self.spec.compat.sigchild {
            return Err(ProcmuxError::Unsupported(
                "cannot signal child processes in sigchild compatibility mode".to_string(),
            ));
        }
        if !self.is_running() {
            return Err(ProcmuxError::ProcessNotRunning(format!(
                "cannot send signal {signal} to `{}`",
                self.command_line
            )));
        }
        self.send_signal(signal)
    }

    /// Suspend with SIGSTOP.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != ProcessState::Started {
            return Err(ProcmuxError::ProcessNotRunning(format!(
                "cannot pause a process in state {}",
                self.state
            )));
        }
        self.signal(Signal::SIGSTOP as i32)?;
        self.state = ProcessState::Paused;
        debug!(pid = self.pid, "process paused");
        Ok(())
    }

    /// Continue a paused process with SIGCONT.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != ProcessState::Paused {
            return Err(ProcmuxError::ProcessNotRunning(format!(
                "cannot resume a process in state {}",
                self.state
            )));
        }
        self.signal(Signal::SIGCONT as i32)?;
        self.state = ProcessState::Started;
        debug!(pid = self.pid, "process resumed");
        Ok(())
    }

    /// Whether the OS process is still alive. Reaps it if it exited.
    pub fn is_running(&mut self) -> bool {
        match self.state {
            ProcessState::Started | ProcessState::Paused => self.refresh_status().unwrap_or(false),
            ProcessState::Ready | ProcessState::Terminated => false,
        }
    }

    /// All output so far, after a non-blocking drain.
    pub fn output(&mut self) -> Result<&[u8]> {
        self.drain_nonblocking()?;
        Ok(self.result.output())
    }

    /// All error output so far, after a non-blocking drain.
    pub fn errors(&mut self) -> Result<&[u8]> {
        self.drain_nonblocking()?;
        Ok(self.result.errors())
    }

    /// Output since the previous call, after a non-blocking drain.
    pub fn latest_output(&mut self) -> Result<&[u8]> {
        self.drain_nonblocking()?;
        Ok(self.result.latest_output())
    }

    /// Error output since the previous call, after a non-blocking drain.
    pub fn latest_errors(&mut self) -> Result<&[u8]> {
        self.drain_nonblocking()?;
        Ok(self.result.latest_errors())
    }

    fn drain_nonblocking(&mut self) -> Result<()> {
        if !matches!(self.state, ProcessState::Started | ProcessState::Paused) {
            return Ok(());
        }
        let running = self.refresh_status()?;
        let chunks = self.pipes.read(false, !running)?;
        self.deliver(chunks, &mut |_, _| {});
        Ok(())
    }

    /// One multiplexed exchange; routes chunks into the result and callback.
    fn pump(
        &mut self,
        input: &[u8],
        blocking: bool,
        close: bool,
        on_output: &mut dyn FnMut(StreamKind, &[u8]),
    ) -> Result<(usize, bool)> {
        let exchange = self.pipes.exchange(input, blocking, close)?;
        self.bytes_written += exchange.written;
        self.deliver(exchange.chunks, on_output);
        Ok((exchange.written, exchange.stdin_closed))
    }

    fn deliver(&mut self, chunks: Vec<Chunk>, on_output: &mut dyn FnMut(StreamKind, &[u8])) {
        for chunk in chunks {
            let kind = match chunk.source {
                PipeSource::Stdout => StreamKind::Stdout,
                PipeSource::Stderr => StreamKind::Stderr,
                PipeSource::ExitCode => {
                    self.exit_code_report.extend_from_slice(&chunk.bytes);
                    continue;
                }
            };
            self.result.accumulate(kind, &chunk.bytes);
            on_output(kind, &chunk.bytes);
        }
    }

    /// Non-blocking reap. Returns whether the process is still running.
    fn refresh_status(&mut self) -> Result<bool> {
        if self.exit_status.is_some() {
            return Ok(false);
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };
        match child.try_wait()? {
            Some(status) => {
                debug!(pid = self.pid, ?status, "process exited");
                self.exit_status = Some(status);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    fn reap_within(&mut self, limit: Duration) -> Result<bool> {
        let deadline = Instant::now() + limit;
        let mut sleep = MIN_REAP_SLEEP;
        while self.refresh_status()? {
            if Instant::now() >= deadline {
                warn!(pid = self.pid, ?limit, "process was not reaped in time");
                return Ok(false);
            }
            std::thread::sleep(sleep);
            sleep = (sleep * 2).min(self.settings.poll_interval);
        }
        Ok(true)
    }

    /// The sigchild wrapper runs the command in a subshell, so it always gets
    /// its own group and `stop` reaches the whole tree.
    fn owns_process_group(&self) -> bool {
        self.spec.options.new_process_group || self.spec.compat.sigchild
    }

    fn send_signal(&mut self, signal: i32) -> Result<()> {
        let Some(pid) = self.pid else {
            return Err(self.not_started("signal"));
        };
        let sig = Signal::try_from(signal).map_err(|err| {
            ProcmuxError::ConfigError(format!("invalid signal number {signal}: {err}"))
        })?;
        let target = Pid::from_raw(pid as i32);
        let sent = if self.owns_process_group() {
            signal::killpg(target, sig)
        } else {
            signal::kill(target, sig)
        };
        sent.map_err(io::Error::from)?;
        debug!(pid, signal, "signal sent");
        self.last_signal = Some(signal);
        Ok(())
    }

    /// Enforce the wall-clock budget measured from process start. On expiry
    /// the process is force-stopped and the partial result returned.
    fn check_timeout(&mut self, phase: TimeoutPhase) -> Result<()> {
        let (Some(timeout), Some(started_at)) = (self.settings.timeout, self.started_at) else {
            return Ok(());
        };
        if started_at.elapsed() <= timeout {
            return Ok(());
        }

        warn!(
            pid = self.pid,
            %phase,
            ?timeout,
            bytes_written = self.bytes_written,
            "process exceeded its timeout; stopping it"
        );
        self.stop(Duration::ZERO, None)?;

        Err(ProcmuxError::Timeout(Box::new(TimeoutFailure {
            phase,
            timeout,
            bytes_written: self.bytes_written,
            result: self.result.clone(),
        })))
    }

    /// Close every descriptor and settle the exit code.
    ///
    /// The syscall-reported status wins unless it is unknown, in which case
    /// the code reported on descriptor 3 (sigchild shim) is used.
    fn finalize(&mut self, check_signal: bool) -> Result<i32> {
        let chunks = self.pipes.read(false, true)?;
        self.deliver(chunks, &mut |_, _| {});
        self.pipes.close_all();

        let sigchild = self.spec.compat.sigchild;
        let status = self.exit_status;
        let syscall_code = match status {
            Some(status) if !sigchild => code_from_status(status),
            _ => UNKNOWN_EXIT_CODE,
        };
        let reported_code = String::from_utf8_lossy(&self.exit_code_report)
            .trim()
            .parse::<i32>()
            .ok();
        let code = if syscall_code == UNKNOWN_EXIT_CODE {
            reported_code.unwrap_or(UNKNOWN_EXIT_CODE)
        } else {
            syscall_code
        };

        self.result.set_code(code);
        self.result.mark_finished();
        self.state = ProcessState::Terminated;
        self.stopped_at = Some(Instant::now());
        let elapsed = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();

        info!(
            pid = self.pid,
            code,
            text = self.result.code_text().unwrap_or("Unknown error"),
            ?elapsed,
            "process finished"
        );

        if check_signal && !sigchild {
            if let Some(signal) = status.and_then(|status| status.signal()) {
                if self.last_signal != Some(signal) {
                    return Err(ProcmuxError::SignaledTermination {
                        signal,
                        result: Box::new(self.result.clone()),
                    });
                }
            }
        }

        Ok(self.final_code())
    }

    fn final_code(&self) -> i32 {
        self.result.code().unwrap_or(UNKNOWN_EXIT_CODE)
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        match self.state {
            ProcessState::Started | ProcessState::Paused => Ok(()),
            ProcessState::Ready => Err(self.not_started(operation)),
            ProcessState::Terminated => Err(ProcmuxError::ProcessNotRunning(format!(
                "cannot {operation}: `{}` has terminated",
                self.command_line
            ))),
        }
    }

    fn not_started(&self, operation: &str) -> ProcmuxError {
        ProcmuxError::ProcessNotRunning(format!(
            "cannot {operation}: `{}` has not been started",
            self.command_line
        ))
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("command_line", &self.command_line)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("exit_status", &self.exit_status)
            .finish_non_exhaustive()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(child) = self.detached.take() {
            reap_detached(child);
        }
        if !matches!(self.state, ProcessState::Started | ProcessState::Paused) {
            return;
        }
        if let Ok(true) = self.refresh_status() {
            debug!(pid = self.pid, "handle dropped while process is running; killing it");
            if self.send_signal(Signal::SIGKILL as i32).is_err() {
                if let Some(child) = self.child.as_mut() {
                    let _ = child.kill();
                }
            }
            if let Some(child) = self.child.as_mut() {
                let _ = child.wait();
            }
        }
    }
}

/// Reap a TTY-mode child: immediately if it already exited, otherwise on a
/// background thread once it does.
fn reap_detached(mut child: Child) {
    match child.try_wait() {
        Ok(Some(_)) => {}
        Ok(None) => {
            let pid = child.id();
            let spawned = std::thread::Builder::new()
                .name(format!("procmux-reap-{pid}"))
                .spawn(move || {
                    let _ = child.wait();
                });
            if let Err(err) = spawned {
                warn!(pid, error = %err, "could not start reaper thread for detached process");
            }
        }
        Err(err) => debug!(pid = child.id(), error = %err, "detached process status unavailable"),
    }
}

/// Exit code, or `128 + signal` for signal deaths.
fn code_from_status(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => UNKNOWN_EXIT_CODE,
    }
}

/// Create the descriptor-3 pipe and arrange for the child to inherit its
/// write end on descriptor 3.
fn exit_code_pipe(command: &mut Command) -> Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    let (reader, writer) = nix::unistd::pipe().map_err(io::Error::from)?;
    set_cloexec(reader.as_raw_fd(), true)?;
    set_cloexec(writer.as_raw_fd(), true)?;

    let writer_fd = writer.as_raw_fd();
    unsafe {
        command.pre_exec(move || {
            if writer_fd == EXIT_CODE_FD {
                set_cloexec(writer_fd, false)
            } else if libc::dup2(writer_fd, EXIT_CODE_FD) == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        });
    }
    Ok((reader, writer))
}
