// src/process/builder.rs

//! Fluent construction of a [`ProcessSpec`] and blocking or live execution.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::errors::{ProcmuxError, Result};
use crate::platform::PlatformCapabilities;

use super::handle::ProcessHandle;
use super::result::{ProcessResult, StreamKind};
use super::spec::{CompatFlags, ProcessSpec};
use super::ExecSettings;

#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    spec: ProcessSpec,
    caps: Arc<PlatformCapabilities>,
    settings: ExecSettings,
    upstream: Option<Box<ProcessBuilder>>,
}

impl ProcessBuilder {
    /// Builder for `command` with compatibility flags derived from `caps`.
    pub fn new(command: impl Into<String>, caps: Arc<PlatformCapabilities>) -> Self {
        let mut spec = ProcessSpec::new(command);
        spec.compat = CompatFlags::from_capabilities(&caps);
        Self {
            spec,
            caps,
            settings: ExecSettings::default(),
            upstream: None,
        }
    }

    /// Builder over an existing spec; its compatibility flags are kept as-is.
    pub fn from_spec(spec: ProcessSpec, caps: Arc<PlatformCapabilities>) -> Self {
        Self {
            spec,
            caps,
            settings: ExecSettings::default(),
            upstream: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `name=value`; only the value is escaped.
    pub fn named_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.named_args.push((name.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    /// Start from an empty environment instead of inheriting the parent's.
    pub fn env_clear(mut self) -> Self {
        self.spec.inherit_env = false;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.timeout = timeout;
        self
    }

    pub fn settings(mut self, settings: ExecSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn sigchild(mut self, enabled: bool) -> Self {
        self.spec.compat.sigchild = enabled;
        self
    }

    pub fn file_stdout(mut self, enabled: bool) -> Self {
        self.spec.compat.file_stdout = enabled;
        self
    }

    pub fn tty(mut self, enabled: bool) -> Self {
        self.spec.compat.tty = enabled;
        self
    }

    pub fn new_process_group(mut self, enabled: bool) -> Self {
        self.spec.options.new_process_group = enabled;
        self
    }

    pub fn keep_stdin_open(mut self, enabled: bool) -> Self {
        self.spec.options.keep_stdin_open = enabled;
        self
    }

    /// Feed the stdout of `upstream` into this process's stdin.
    pub fn pipe_from(mut self, upstream: ProcessBuilder) -> Self {
        self.upstream = Some(Box::new(upstream));
        self
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn exec_settings(&self) -> &ExecSettings {
        &self.settings
    }

    /// Validated command line, shims applied.
    pub fn command_line(&self) -> Result<String> {
        self.spec.validate()?;
        Ok(self.spec.command_line(&self.caps))
    }

    /// Run to completion and return the terminal result.
    ///
    /// `timeout`, when given, overrides the configured budget for this
    /// process and every upstream stage.
    pub fn execute<F>(&self, input: &[u8], mut on_output: F, timeout: Option<Duration>) -> Result<ProcessResult>
    where
        F: FnMut(StreamKind, &[u8]),
    {
        self.execute_stage(input, &mut on_output, timeout)
    }

    fn execute_stage(
        &self,
        input: &[u8],
        on_output: &mut dyn FnMut(StreamKind, &[u8]),
        timeout: Option<Duration>,
    ) -> Result<ProcessResult> {
        self.spec.validate()?;

        let upstream_output;
        let input = match &self.upstream {
            Some(upstream) => {
                debug!(
                    upstream = %upstream,
                    downstream = %self,
                    "running upstream stage of pipeline"
                );
                let result = upstream.execute_stage(input, &mut |_, _| {}, timeout)?;
                upstream_output = result.output().to_vec();
                upstream_output.as_slice()
            }
            None => input,
        };

        let mut settings = self.settings;
        if timeout.is_some() {
            settings.timeout = timeout;
        }

        let mut handle = ProcessHandle::new(self.spec.clone(), Arc::clone(&self.caps), settings);
        handle.start(input, &mut *on_output)?;
        let code = handle.wait(&mut *on_output)?;
        info!(command = %handle.command_line(), code, "execution finished");
        Ok(handle.into_result())
    }

    /// Start the process and return the live handle.
    pub fn spawn(&self, input: &[u8]) -> Result<ProcessHandle> {
        if self.upstream.is_some() {
            return Err(ProcmuxError::Unsupported(
                "piped builders cannot be spawned; use execute()".to_string(),
            ));
        }
        self.spec.validate()?;

        let mut handle = ProcessHandle::new(self.spec.clone(), Arc::clone(&self.caps), self.settings);
        handle.start(input, |_, _| {})?;
        Ok(handle)
    }
}

impl fmt::Display for ProcessBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec.command_line(&self.caps))
    }
}
