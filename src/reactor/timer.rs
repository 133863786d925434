// src/reactor/timer.rs

//! Timers and the per-loop timer queue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use super::EventLoop;

/// Callback invoked when a timer fires.
pub type TimerCallback = Box<dyn FnMut(&mut dyn EventLoop, TimerId)>;

/// Opaque handle to a timer scheduled on a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// A scheduled one-shot or periodic callback.
pub(crate) struct Timer {
    id: TimerId,
    interval: Duration,
    periodic: bool,
    next_fire: Instant,
    seq: u64,
    active: bool,
    callback: TimerCallback,
}

impl Timer {
    /// Invoke the callback, then re-arm (periodic) or deactivate (one-shot).
    ///
    /// The next fire time is measured from when the callback returns, so each
    /// periodic firing is gated on completion of the previous one.
    pub(crate) fn call(&mut self, event_loop: &mut dyn EventLoop) {
        (self.callback)(event_loop, self.id);
        if self.periodic {
            self.next_fire = Instant::now() + self.interval;
        } else {
            self.active = false;
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .field("periodic", &self.periodic)
            .field("next_fire", &self.next_fire)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// Heap size below which stale entries are left for lazy removal.
const COMPACT_MIN_ENTRIES: usize = 64;

/// A timer taken out of the queue while its callback runs.
struct Firing {
    id: TimerId,
    cancelled: bool,
}

/// Active timers ordered by due time, ties broken by insertion order.
///
/// The heap may hold stale entries for cancelled timers; an entry is live
/// only while its sequence number matches the timer's. Stale entries are
/// purged once they outnumber the live ones.
#[derive(Default)]
pub(crate) struct TimerQueue {
    next_id: u64,
    next_seq: u64,
    timers: HashMap<TimerId, Timer>,
    schedule: BinaryHeap<Reverse<(Instant, u64, TimerId)>>,
    firing: Option<Firing>,
}

impl TimerQueue {
    pub(crate) fn add(
        &mut self,
        interval: Duration,
        periodic: bool,
        first_fire: Instant,
        callback: TimerCallback,
    ) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let timer = Timer {
            id,
            interval,
            periodic,
            next_fire: first_fire,
            seq: 0,
            active: true,
            callback,
        };
        self.insert(timer);
        id
    }

    fn insert(&mut self, mut timer: Timer) {
        self.next_seq += 1;
        timer.seq = self.next_seq;
        self.schedule
            .push(Reverse((timer.next_fire, timer.seq, timer.id)));
        self.timers.insert(timer.id, timer);
    }

    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        if self.timers.remove(&id).is_some() {
            self.compact();
            return true;
        }
        match self.firing.as_mut() {
            Some(firing) if firing.id == id && !firing.cancelled => {
                firing.cancelled = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_active(&self, id: TimerId) -> bool {
        if self.timers.contains_key(&id) {
            return true;
        }
        matches!(&self.firing, Some(firing) if firing.id == id && !firing.cancelled)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    /// Earliest due time among live timers.
    pub(crate) fn next_due(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, seq, id))) = self.schedule.peek().copied() {
            if self.is_live(seq, id) {
                return Some(at);
            }
            self.schedule.pop();
        }
        None
    }

    /// Pop every live timer due at `now`, earliest first.
    pub(crate) fn collect_due(&mut self, now: Instant) -> Vec<TimerId> {
        let mut due = Vec::new();
        while let Some(Reverse((at, seq, id))) = self.schedule.peek().copied() {
            if at > now {
                break;
            }
            self.schedule.pop();
            if self.is_live(seq, id) {
                due.push(id);
            }
        }
        due
    }

    fn compact(&mut self) {
        if self.schedule.len() <= COMPACT_MIN_ENTRIES || self.schedule.len() <= 2 * self.timers.len() {
            return;
        }
        let timers = &self.timers;
        self.schedule
            .retain(|Reverse((_, seq, id))| timers.get(id).is_some_and(|t| t.seq == *seq));
    }

    fn is_live(&self, seq: u64, id: TimerId) -> bool {
        self.timers.get(&id).is_some_and(|t| t.seq == seq)
    }

    /// Take a timer out for firing. `None` if it was cancelled meanwhile.
    pub(crate) fn begin_fire(&mut self, id: TimerId) -> Option<Timer> {
        let timer = self.timers.remove(&id)?;
        self.firing = Some(Firing {
            id,
            cancelled: false,
        });
        Some(timer)
    }

    /// Put a fired timer back if it is periodic and was not cancelled from
    /// inside its own callback.
    pub(crate) fn end_fire(&mut self, timer: Timer) {
        let cancelled = self
            .firing
            .take()
            .map(|firing| firing.cancelled)
            .unwrap_or(false);
        if timer.periodic && timer.active && !cancelled {
            self.insert(timer);
        }
    }
}
