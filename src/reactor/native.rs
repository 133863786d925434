// src/reactor/native.rs

//! Linux `epoll(7)` driver.
//!
//! Registrations live in the kernel, so `wait` does not rebuild a descriptor
//! set. `epoll` refuses regular files (`EPERM`); such registrations fail at
//! `on_readable`/`on_writable` time rather than silently never firing.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::time::Duration;

use tracing::debug;

use super::mux::{timeout_millis, Interest, MuxOutcome};
use super::{Driver, LoopBackend, ReadyEvent};

const MAX_EVENTS: usize = 256;

pub struct NativeDriver {
    epoll: OwnedFd,
    registered: HashMap<RawFd, Interest>,
    buffer: Vec<libc::epoll_event>,
}

impl NativeDriver {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
            registered: HashMap::new(),
            buffer: vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS],
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut flags = 0u32;
        if interest.read {
            flags |= libc::EPOLLIN as u32;
        }
        if interest.write {
            flags |= libc::EPOLLOUT as u32;
        }
        let mut event = libc::epoll_event {
            events: flags,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Driver for NativeDriver {
    fn backend(&self) -> LoopBackend {
        LoopBackend::Native
    }

    fn update(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        match (self.registered.contains_key(&fd), interest.is_empty()) {
            (false, true) => Ok(()),
            (false, false) => {
                self.ctl(libc::EPOLL_CTL_ADD, fd, interest)?;
                self.registered.insert(fd, interest);
                Ok(())
            }
            (true, true) => {
                self.registered.remove(&fd);
                // The descriptor may already be closed, which removed it from
                // the interest list on its own.
                if let Err(err) = self.ctl(libc::EPOLL_CTL_DEL, fd, interest) {
                    debug!(fd, error = %err, "epoll delete failed; descriptor already gone");
                }
                Ok(())
            }
            (true, false) => {
                self.ctl(libc::EPOLL_CTL_MOD, fd, interest)?;
                self.registered.insert(fd, interest);
                Ok(())
            }
        }
    }

    fn wait(&mut self, timeout: Option<Duration>, events: &mut Vec<ReadyEvent>) -> MuxOutcome {
        let rc = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                self.buffer.as_mut_ptr(),
                self.buffer.len() as libc::c_int,
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

        let count = rc as usize;
        for raw in &self.buffer[..count] {
            // epoll_event is packed on some targets; copy fields out.
            let flags = raw.events;
            let fd = raw.u64 as RawFd;
            let Some(interest) = self.registered.get(&fd).copied() else {
                continue;
            };
            let hangup = flags & (libc::EPOLLHUP as u32 | libc::EPOLLERR as u32) != 0;
            let ready = Interest {
                read: interest.read && (flags & libc::EPOLLIN as u32 != 0 || hangup),
                write: interest.write && (flags & libc::EPOLLOUT as u32 != 0 || hangup),
            };
            if !ready.is_empty() {
                events.push(ReadyEvent {
                    fd,
                    ready,
                    invalid: false,
                });
            }
        }
        MuxOutcome::Ready(count)
    }

    fn clear(&mut self) {
        let fds: Vec<RawFd> = self.registered.keys().copied().collect();
        for fd in fds {
            let _ = self.update(fd, Interest::default());
        }
    }
}
