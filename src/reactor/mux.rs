// src/reactor/mux.rs

//! Typed wrapper around `poll(2)`.
//!
//! Both the event loop's select driver and the process pipe exchange call
//! through here, so interrupted system calls surface as an explicit
//! [`MuxOutcome::Interrupted`] branch instead of an error to be sniffed.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Readiness interest / readiness report for one descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}

/// One descriptor handed to [`poll_fds`].
#[derive(Debug, Clone, Copy)]
pub struct PollEntry {
    pub fd: RawFd,
    pub interest: Interest,
    /// Filled in by `poll_fds`.
    pub ready: Interest,
    /// The descriptor was reported invalid (`POLLNVAL`).
    pub invalid: bool,
}

impl PollEntry {
    pub fn new(fd: RawFd, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            ready: Interest::default(),
            invalid: false,
        }
    }
}

/// Outcome of a single multiplexing call.
#[derive(Debug)]
pub enum MuxOutcome {
    /// Number of descriptors with a non-empty readiness report.
    Ready(usize),
    /// The call was interrupted by a signal before anything became ready.
    Interrupted,
    Failed(io::Error),
}

/// Convert an optional wait bound into a `poll`-style millisecond timeout.
///
/// `None` blocks indefinitely. Sub-millisecond bounds round up so that a
/// pending timer never degenerates into a busy loop.
pub fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) if d.is_zero() => 0,
        Some(d) => {
            let mut ms = d.as_millis();
            if Duration::from_millis(ms as u64) < d {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

/// Wait until one of `entries` is ready or `timeout` elapses.
///
/// An empty `entries` slice turns this into a plain sleep for `timeout`.
/// Hang-ups and errors are reported as readable (and writable when write
/// interest was requested) so the owner observes EOF / EPIPE on its next
/// non-blocking call.
pub fn poll_fds(entries: &mut [PollEntry], timeout: Option<Duration>) -> MuxOutcome {
    let mut fds: Vec<libc::pollfd> = entries
        .iter()
        .map(|entry| {
            let mut events: libc::c_short = 0;
            if entry.interest.read {
                events |= libc::POLLIN;
            }
            if entry.interest.write {
                events |= libc::POLLOUT;
            }
            libc::pollfd {
                fd: entry.fd,
                events,
                revents: 0,
            }
        })
        .collect();

    let rc = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_millis(timeout),
        )
    };

    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return MuxOutcome::Interrupted;
        }
        return MuxOutcome::Failed(err);
    }

    let mut ready = 0;
    for (entry, pfd) in entries.iter_mut().zip(fds.iter()) {
        let revents = pfd.revents;
        let hangup = revents & (libc::POLLHUP | libc::POLLERR) != 0;
        entry.invalid = revents & libc::POLLNVAL != 0;
        entry.ready = Interest {
            read: entry.interest.read && (revents & libc::POLLIN != 0 || hangup),
            write: entry.interest.write && (revents & libc::POLLOUT != 0 || hangup),
        };
        if !entry.ready.is_empty() || entry.invalid {
            ready += 1;
        }
    }

    MuxOutcome::Ready(ready)
}

/// Put a descriptor into non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Set or clear `FD_CLOEXEC` on a descriptor.
pub fn set_cloexec(fd: RawFd, enabled: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let wanted = if enabled {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    if wanted != flags && unsafe { libc::fcntl(fd, libc::F_SETFD, wanted) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
