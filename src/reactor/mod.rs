// src/reactor/mod.rs

//! Single-threaded I/O reactor.
//!
//! - [`EventLoop`] is the interface collaborators program against: stream
//!   readiness callbacks, timers, and the `run`/`tick`/`stop` controls.
//! - [`Reactor`] implements it once on top of a [`Driver`], the seam where
//!   the readiness primitive differs per platform.
//! - [`select::SelectDriver`] uses `poll(2)` and works everywhere;
//!   [`native::NativeDriver`] uses `epoll(7)` on Linux.
//! - [`create_loop`] picks a driver from [`PlatformCapabilities`].
//!
//! The process subsystem does not register its pipes here; it runs its own
//! blocking exchange loops over the same [`mux`] primitive.

pub mod mux;
#[cfg(target_os = "linux")]
pub mod native;
pub mod select;
pub mod timer;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::{ProcmuxError, Result};
use crate::platform::PlatformCapabilities;

pub use mux::{Interest, MuxOutcome};
#[cfg(target_os = "linux")]
pub use native::NativeDriver;
pub use select::SelectDriver;
pub use timer::{TimerCallback, TimerId};

use timer::TimerQueue;

/// Callback invoked when a registered descriptor becomes ready.
pub type StreamCallback = Box<dyn FnMut(&mut dyn EventLoop, RawFd)>;

/// Reactor interface.
///
/// Callbacks receive the loop itself so they can register, cancel or stop
/// from inside a dispatch.
pub trait EventLoop {
    fn backend(&self) -> LoopBackend;

    /// Call `callback` whenever `fd` is readable. A second registration for
    /// the same descriptor is ignored.
    fn on_readable(&mut self, fd: RawFd, callback: StreamCallback) -> Result<()>;

    /// Call `callback` whenever `fd` is writable. A second registration for
    /// the same descriptor is ignored.
    fn on_writable(&mut self, fd: RawFd, callback: StreamCallback) -> Result<()>;

    fn off_readable(&mut self, fd: RawFd);

    fn off_writable(&mut self, fd: RawFd);

    /// Drop both directions for `fd`.
    fn off(&mut self, fd: RawFd);

    /// One-shot timer due at `when`.
    fn at(&mut self, when: Instant, callback: TimerCallback) -> TimerId;

    /// One-shot timer due `delay` from now.
    fn after(&mut self, delay: Duration, callback: TimerCallback) -> TimerId;

    /// Periodic timer. A zero interval is rejected.
    fn repeat(&mut self, interval: Duration, callback: TimerCallback) -> Result<TimerId>;

    /// One-shot timer due on the next iteration.
    fn immediately(&mut self, callback: TimerCallback) -> TimerId;

    /// Returns `false` when the timer already fired (one-shot) or was
    /// cancelled before.
    fn cancel_timer(&mut self, timer: TimerId) -> bool;

    fn is_timer_active(&self, timer: TimerId) -> bool;

    /// One non-blocking iteration.
    fn tick(&mut self);

    /// Iterate until `stop` is observed or nothing is left to wait for.
    fn run(&mut self);

    /// Ask `run` to return after the current iteration.
    fn stop(&mut self);
}

/// Readiness backend choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopBackend {
    #[default]
    Auto,
    Select,
    Native,
}

impl fmt::Display for LoopBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopBackend::Auto => "auto",
            LoopBackend::Select => "select",
            LoopBackend::Native => "native",
        };
        f.write_str(name)
    }
}

impl FromStr for LoopBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(LoopBackend::Auto),
            "select" | "poll" => Ok(LoopBackend::Select),
            "native" | "epoll" => Ok(LoopBackend::Native),
            other => Err(format!(
                "invalid reactor backend: {other} (expected \"auto\", \"select\" or \"native\")"
            )),
        }
    }
}

/// A descriptor reported ready by a driver.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub fd: RawFd,
    pub ready: Interest,
    /// The descriptor is no longer valid and has been dropped by the driver.
    pub invalid: bool,
}

/// Platform readiness primitive behind a [`Reactor`].
pub trait Driver {
    fn backend(&self) -> LoopBackend;

    /// Set the interest for `fd`; an empty interest removes it.
    fn update(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;

    /// Block for at most `timeout` (`None` = indefinitely) and append ready
    /// descriptors to `events`.
    fn wait(&mut self, timeout: Option<Duration>, events: &mut Vec<ReadyEvent>) -> MuxOutcome;

    /// Forget every registration.
    fn clear(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

struct Handler {
    id: u64,
    /// `None` while the callback is being dispatched.
    callback: Option<StreamCallback>,
}

#[derive(Default)]
struct Registration {
    read: Option<Handler>,
    write: Option<Handler>,
}

impl Registration {
    fn slot(&mut self, direction: Direction) -> &mut Option<Handler> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    fn interest(&self) -> Interest {
        Interest {
            read: self.read.is_some(),
            write: self.write.is_some(),
        }
    }
}

/// Event loop over a concrete [`Driver`].
pub struct Reactor<D: Driver> {
    driver: D,
    streams: BTreeMap<RawFd, Registration>,
    timers: TimerQueue,
    running: bool,
    next_handler: u64,
    events: Vec<ReadyEvent>,
}

pub type SelectLoop = Reactor<SelectDriver>;
#[cfg(target_os = "linux")]
pub type NativeLoop = Reactor<NativeDriver>;

impl SelectLoop {
    pub fn select() -> Self {
        Reactor::new(SelectDriver::new())
    }
}

#[cfg(target_os = "linux")]
impl NativeLoop {
    pub fn native() -> io::Result<Self> {
        Ok(Reactor::new(NativeDriver::new()?))
    }
}

impl<D: Driver> Reactor<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            streams: BTreeMap::new(),
            timers: TimerQueue::default(),
            running: false,
            next_handler: 0,
            events: Vec::new(),
        }
    }

    /// Number of descriptors with at least one registered direction.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    fn register(&mut self, fd: RawFd, direction: Direction, callback: StreamCallback) -> Result<()> {
        if fd < 0 {
            return Err(ProcmuxError::ConfigError(format!(
                "cannot register invalid descriptor {fd}"
            )));
        }

        let registration = self.streams.entry(fd).or_default();
        if registration.slot(direction).is_some() {
            debug!(fd, ?direction, "stream already registered; keeping existing callback");
            return Ok(());
        }

        self.next_handler += 1;
        *registration.slot(direction) = Some(Handler {
            id: self.next_handler,
            callback: Some(callback),
        });
        let interest = registration.interest();

        if let Err(err) = self.driver.update(fd, interest) {
            self.unregister(fd, direction);
            return Err(err.into());
        }
        debug!(fd, ?direction, backend = %self.driver.backend(), "stream registered");
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd, direction: Direction) {
        let Some(registration) = self.streams.get_mut(&fd) else {
            return;
        };
        if registration.slot(direction).take().is_none() {
            return;
        }
        let interest = registration.interest();
        if interest.is_empty() {
            self.streams.remove(&fd);
        }
        if let Err(err) = self.driver.update(fd, interest) {
            warn!(fd, error = %err, "failed to update driver interest");
        }
    }

    fn fire_due_timers(&mut self) {
        let due = self.timers.collect_due(Instant::now());
        for id in due {
            // An earlier callback in this batch may have cancelled it.
            let Some(mut timer) = self.timers.begin_fire(id) else {
                continue;
            };
            timer.call(self);
            self.timers.end_fire(timer);
        }
    }

    fn dispatch(&mut self, fd: RawFd, direction: Direction) {
        let Some(handler) = self
            .streams
            .get_mut(&fd)
            .and_then(|registration| registration.slot(direction).as_mut())
        else {
            return;
        };
        let id = handler.id;
        let Some(mut callback) = handler.callback.take() else {
            return;
        };

        callback(self as &mut dyn EventLoop, fd);

        // Restore unless the callback removed or replaced its registration.
        if let Some(handler) = self
            .streams
            .get_mut(&fd)
            .and_then(|registration| registration.slot(direction).as_mut())
        {
            if handler.id == id && handler.callback.is_none() {
                handler.callback = Some(callback);
            }
        }
    }

    /// Wait bound for the next multiplexing call; `None` means "nothing to
    /// wait for".
    fn wait_bound(&mut self, blocking: bool) -> Option<Option<Duration>> {
        if !blocking || !self.running {
            return Some(Some(Duration::ZERO));
        }
        if let Some(at) = self.timers.next_due() {
            return Some(Some(at.saturating_duration_since(Instant::now())));
        }
        if self.streams.is_empty() {
            return None;
        }
        Some(None)
    }

    /// Run one iteration. Returns `false` if there was nothing to wait on.
    fn iterate(&mut self, blocking: bool) -> bool {
        self.fire_due_timers();

        let mut events = std::mem::take(&mut self.events);
        loop {
            let Some(timeout) = self.wait_bound(blocking) else {
                self.events = events;
                return false;
            };

            events.clear();
            match self.driver.wait(timeout, &mut events) {
                MuxOutcome::Ready(_) => break,
                MuxOutcome::Interrupted => {
                    debug!("multiplexing call interrupted; retrying");
                    continue;
                }
                MuxOutcome::Failed(err) => {
                    warn!(
                        error = %err,
                        streams = self.streams.len(),
                        "multiplexing failed; dropping all stream registrations"
                    );
                    events.clear();
                    self.driver.clear();
                    self.streams.clear();
                    break;
                }
            }
        }

        for event in &events {
            if event.invalid {
                warn!(fd = event.fd, "registered descriptor is invalid; removing it");
                self.streams.remove(&event.fd);
                continue;
            }
            if event.ready.read {
                self.dispatch(event.fd, Direction::Read);
            }
            if event.ready.write {
                self.dispatch(event.fd, Direction::Write);
            }
        }

        self.events = events;
        true
    }
}

impl<D: Driver> EventLoop for Reactor<D> {
    fn backend(&self) -> LoopBackend {
        self.driver.backend()
    }

    fn on_readable(&mut self, fd: RawFd, callback: StreamCallback) -> Result<()> {
        self.register(fd, Direction::Read, callback)
    }

    fn on_writable(&mut self, fd: RawFd, callback: StreamCallback) -> Result<()> {
        self.register(fd, Direction::Write, callback)
    }

    fn off_readable(&mut self, fd: RawFd) {
        self.unregister(fd, Direction::Read);
    }

    fn off_writable(&mut self, fd: RawFd) {
        self.unregister(fd, Direction::Write);
    }

    fn off(&mut self, fd: RawFd) {
        self.unregister(fd, Direction::Read);
        self.unregister(fd, Direction::Write);
    }

    fn at(&mut self, when: Instant, callback: TimerCallback) -> TimerId {
        let now = Instant::now();
        let delay = when.saturating_duration_since(now);
        let id = self.timers.add(delay, false, when, callback);
        debug!(timer = %id, ?delay, "one-shot timer scheduled");
        id
    }

    fn after(&mut self, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = self.timers.add(delay, false, Instant::now() + delay, callback);
        debug!(timer = %id, ?delay, "one-shot timer scheduled");
        id
    }

    fn repeat(&mut self, interval: Duration, callback: TimerCallback) -> Result<TimerId> {
        if interval.is_zero() {
            return Err(ProcmuxError::ConfigError(
                "periodic timer interval must be greater than zero".to_string(),
            ));
        }
        let id = self
            .timers
            .add(interval, true, Instant::now() + interval, callback);
        debug!(timer = %id, ?interval, "periodic timer scheduled");
        Ok(id)
    }

    fn immediately(&mut self, callback: TimerCallback) -> TimerId {
        self.timers
            .add(Duration::ZERO, false, Instant::now(), callback)
    }

    fn cancel_timer(&mut self, timer: TimerId) -> bool {
        let cancelled = self.timers.cancel(timer);
        if cancelled {
            debug!(%timer, "timer cancelled");
        }
        cancelled
    }

    fn is_timer_active(&self, timer: TimerId) -> bool {
        self.timers.is_active(timer)
    }

    fn tick(&mut self) {
        self.iterate(false);
    }

    fn run(&mut self) {
        self.running = true;
        info!(backend = %self.driver.backend(), "event loop started");
        while self.running {
            if !self.iterate(true) {
                debug!("no streams or timers left");
                break;
            }
        }
        self.running = false;
        info!("event loop stopped");
    }

    fn stop(&mut self) {
        self.running = false;
    }
}

/// Build an event loop for the given capabilities.
///
/// `Auto` prefers the native driver and falls back to the select driver if
/// it is unavailable or cannot be created.
pub fn create_loop(
    caps: &PlatformCapabilities,
    backend: LoopBackend,
) -> Result<Box<dyn EventLoop>> {
    match backend {
        LoopBackend::Select => Ok(Box::new(SelectLoop::select())),
        LoopBackend::Native => {
            if !caps.has_native_events() {
                return Err(ProcmuxError::Unsupported(
                    "native event backend is not available on this platform".to_string(),
                ));
            }
            native_loop()
        }
        LoopBackend::Auto => {
            if caps.has_native_events() {
                match native_loop() {
                    Ok(event_loop) => return Ok(event_loop),
                    Err(err) => {
                        warn!(error = %err, "native event backend failed; using select driver");
                    }
                }
            }
            Ok(Box::new(SelectLoop::select()))
        }
    }
}

#[cfg(target_os = "linux")]
fn native_loop() -> Result<Box<dyn EventLoop>> {
    Ok(Box::new(NativeLoop::native()?))
}

#[cfg(not(target_os = "linux"))]
fn native_loop() -> Result<Box<dyn EventLoop>> {
    Err(ProcmuxError::Unsupported(
        "native event backend requires Linux".to_string(),
    ))
}
