// src/process/pipes.rs

//! Descriptor set of a spawned process.
//!
//! Stdout is captured either through an anonymous pipe (default) or through
//! a temp file on platforms where large or binary pipe reads are unreliable.
//! Stderr always uses a pipe. In sigchild compatibility mode a fourth pipe
//! carries the exit code written by the shell wrapper on descriptor 3.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::reactor::mux::{poll_fds, set_nonblocking, Interest, MuxOutcome, PollEntry};

/// Where a chunk of bytes was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeSource {
    Stdout,
    Stderr,
    ExitCode,
}

#[derive(Debug)]
pub(crate) struct Chunk {
    pub(crate) source: PipeSource,
    pub(crate) bytes: Vec<u8>,
}

/// Result of one multiplexed read/write step.
#[derive(Debug, Default)]
pub(crate) struct Exchange {
    pub(crate) written: usize,
    pub(crate) stdin_closed: bool,
    pub(crate) chunks: Vec<Chunk>,
}

/// Temp-file stdout capture with its own read offset.
///
/// The child writes through an independent handle, so seeking the reader
/// never moves the child's write position.
#[derive(Debug)]
pub(crate) struct FileCapture {
    file: NamedTempFile,
    reader: File,
    offset: u64,
}

impl FileCapture {
    pub(crate) fn new() -> io::Result<Self> {
        let file = NamedTempFile::new()?;
        let reader = file.reopen()?;
        Ok(Self {
            file,
            reader,
            offset: 0,
        })
    }

    fn child_stdio(&self) -> io::Result<Stdio> {
        Ok(Stdio::from(self.file.reopen()?))
    }

    /// Read from the last offset to the current end of file.
    fn read_new(&mut self) -> io::Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(self.offset))?;
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes)?;
        self.offset += bytes.len() as u64;
        Ok(bytes)
    }
}

/// Configure stdio on `command` and return the file capture, if any.
pub(crate) fn configure_stdio(command: &mut Command, file_stdout: bool) -> io::Result<Option<FileCapture>> {
    command.stdin(Stdio::piped()).stderr(Stdio::piped());
    if file_stdout {
        let capture = FileCapture::new()?;
        command.stdout(capture.child_stdio()?);
        Ok(Some(capture))
    } else {
        command.stdout(Stdio::piped());
        Ok(None)
    }
}

#[derive(Debug)]
pub(crate) struct ProcessPipes {
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    exit_code: Option<File>,
    stdout_file: Option<FileCapture>,
    poll_interval: Duration,
    chunk_size: usize,
}

impl ProcessPipes {
    pub(crate) fn new(poll_interval: Duration, chunk_size: usize) -> Self {
        Self {
            stdin: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            stdout_file: None,
            poll_interval,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Take ownership of the parent-side descriptors and make them
    /// non-blocking.
    pub(crate) fn attach(
        &mut self,
        stdin: Option<ChildStdin>,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        exit_code: Option<File>,
        stdout_file: Option<FileCapture>,
    ) -> io::Result<()> {
        if let Some(pipe) = &stdin {
            set_nonblocking(pipe.as_raw_fd())?;
        }
        if let Some(pipe) = &stdout {
            set_nonblocking(pipe.as_raw_fd())?;
        }
        if let Some(pipe) = &stderr {
            set_nonblocking(pipe.as_raw_fd())?;
        }
        if let Some(pipe) = &exit_code {
            set_nonblocking(pipe.as_raw_fd())?;
        }
        self.stdin = stdin;
        self.stdout = stdout;
        self.stderr = stderr;
        self.exit_code = exit_code;
        self.stdout_file = stdout_file;
        Ok(())
    }

    pub(crate) fn has_stdin(&self) -> bool {
        self.stdin.is_some()
    }

    /// Whether any output backend may still produce bytes.
    pub(crate) fn has_open_readers(&self) -> bool {
        self.stdout.is_some()
            || self.stderr.is_some()
            || self.exit_code.is_some()
            || self.stdout_file.is_some()
    }

    pub(crate) fn close_stdin(&mut self) {
        if self.stdin.take().is_some() {
            debug!("stdin closed");
        }
    }

    pub(crate) fn close_all(&mut self) {
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        self.exit_code = None;
        self.stdout_file = None;
    }

    /// Drain readable output without writing anything.
    pub(crate) fn read(&mut self, blocking: bool, close: bool) -> io::Result<Vec<Chunk>> {
        Ok(self.exchange(&[], blocking, close)?.chunks)
    }

    /// Multiplex stdin (when `input` is non-empty) with every read side,
    /// write at most one chunk and read at most one chunk per ready pipe.
    ///
    /// Blocking exchanges wait up to the poll interval; non-blocking ones
    /// only collect what is already available. Pipes are closed on EOF; the
    /// file capture is closed after a read when `close` is set.
    pub(crate) fn exchange(&mut self, input: &[u8], blocking: bool, close: bool) -> io::Result<Exchange> {
        let mut exchange = Exchange::default();
        let mut entries = self.poll_entries(!input.is_empty());

        if !entries.is_empty() || blocking {
            let timeout = if blocking {
                self.poll_interval
            } else {
                Duration::ZERO
            };
            match poll_fds(&mut entries, Some(timeout)) {
                MuxOutcome::Ready(_) => {}
                // Nothing is marked ready; the caller loops again.
                MuxOutcome::Interrupted => {}
                MuxOutcome::Failed(err) => return Err(err),
            }
        }

        for entry in &entries {
            if entry.ready.write {
                self.write_stdin(input, &mut exchange)?;
            }
            if entry.ready.read || entry.invalid {
                self.read_ready(entry.fd, &mut exchange)?;
            }
        }

        if let Some(capture) = self.stdout_file.as_mut() {
            let bytes = capture.read_new()?;
            if !bytes.is_empty() {
                exchange.chunks.push(Chunk {
                    source: PipeSource::Stdout,
                    bytes,
                });
            }
            if close {
                debug!(offset = capture.offset, "stdout capture file exhausted; closing");
                self.stdout_file = None;
            }
        }

        Ok(exchange)
    }

    fn poll_entries(&self, want_write: bool) -> Vec<PollEntry> {
        let mut entries = Vec::with_capacity(4);
        if want_write {
            if let Some(pipe) = &self.stdin {
                entries.push(PollEntry::new(pipe.as_raw_fd(), Interest::WRITE));
            }
        }
        if let Some(pipe) = &self.stdout {
            entries.push(PollEntry::new(pipe.as_raw_fd(), Interest::READ));
        }
        if let Some(pipe) = &self.stderr {
            entries.push(PollEntry::new(pipe.as_raw_fd(), Interest::READ));
        }
        if let Some(pipe) = &self.exit_code {
            entries.push(PollEntry::new(pipe.as_raw_fd(), Interest::READ));
        }
        entries
    }

    fn write_stdin(&mut self, input: &[u8], exchange: &mut Exchange) -> io::Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(());
        };
        let len = input.len().min(self.chunk_size);
        match stdin.write(&input[..len]) {
            Ok(written) => exchange.written += written,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                debug!("process closed its stdin");
                self.stdin = None;
                exchange.stdin_closed = true;
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    fn read_ready(&mut self, fd: RawFd, exchange: &mut Exchange) -> io::Result<()> {
        let chunk_size = self.chunk_size;
        if is_fd(&self.stdout, fd) {
            read_chunk(&mut self.stdout, PipeSource::Stdout, chunk_size, exchange)
        } else if is_fd(&self.stderr, fd) {
            read_chunk(&mut self.stderr, PipeSource::Stderr, chunk_size, exchange)
        } else if is_fd(&self.exit_code, fd) {
            read_chunk(&mut self.exit_code, PipeSource::ExitCode, chunk_size, exchange)
        } else {
            Ok(())
        }
    }
}

fn is_fd<T: AsRawFd>(slot: &Option<T>, fd: RawFd) -> bool {
    slot.as_ref().is_some_and(|pipe| pipe.as_raw_fd() == fd)
}

/// Read one chunk from `slot`, closing it on EOF.
fn read_chunk<R: Read>(
    slot: &mut Option<R>,
    source: PipeSource,
    chunk_size: usize,
    exchange: &mut Exchange,
) -> io::Result<()> {
    let Some(pipe) = slot.as_mut() else {
        return Ok(());
    };
    let mut buf = vec![0u8; chunk_size];
    match pipe.read(&mut buf) {
        Ok(0) => {
            debug!(?source, "pipe reached EOF; closing");
            *slot = None;
        }
        Ok(n) => {
            buf.truncate(n);
            exchange.chunks.push(Chunk { source, bytes: buf });
        }
        Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
        Err(err) => {
            *slot = None;
            return Err(err);
        }
    }
    Ok(())
}
