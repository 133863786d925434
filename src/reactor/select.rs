// src/reactor/select.rs

//! Portable `poll(2)` driver.

use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::mux::{poll_fds, Interest, MuxOutcome, PollEntry};
use super::{Driver, LoopBackend, ReadyEvent};

/// Driver that rebuilds the descriptor set on every wait.
///
/// Works with any descriptor `poll` accepts, including regular files (which
/// are always ready).
#[derive(Debug, Default)]
pub struct SelectDriver {
    interests: BTreeMap<RawFd, Interest>,
    entries: Vec<PollEntry>,
}

impl SelectDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for SelectDriver {
    fn backend(&self) -> LoopBackend {
        LoopBackend::Select
    }

    fn update(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if interest.is_empty() {
            self.interests.remove(&fd);
        } else {
            self.interests.insert(fd, interest);
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>, events: &mut Vec<ReadyEvent>) -> MuxOutcome {
        self.entries.clear();
        self.entries.extend(
            self.interests
                .iter()
                .map(|(fd, interest)| PollEntry::new(*fd, *interest)),
        );

        let outcome = poll_fds(&mut self.entries, timeout);
        if let MuxOutcome::Ready(_) = outcome {
            for entry in &self.entries {
                if entry.invalid {
                    self.interests.remove(&entry.fd);
                }
                if entry.invalid || !entry.ready.is_empty() {
                    events.push(ReadyEvent {
                        fd: entry.fd,
                        ready: entry.ready,
                        invalid: entry.invalid,
                    });
                }
            }
        }
        outcome
    }

    fn clear(&mut self) {
        self.interests.clear();
        self.entries.clear();
    }
}
