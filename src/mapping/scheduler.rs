//! Single timer wheel for the poll thread
//!
//! Every deferred action (turbo phases, wheel repeats, slot delays and
//! pauses, mouse refresh ticks, the idle reset) is an entry here rather than
//! an OS timer. Entries are keyed by `(owner, kind)`: scheduling the same key
//! again replaces the previous deadline, and removing a device drops every
//! entry its buttons own in one call.

use super::button::ButtonKey;
use super::output::WheelAxis;
use crate::controller::backend::DeviceId;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerOwner {
    Button(ButtonKey),
    Daemon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    Turbo,
    Wheel(WheelAxis),
    Delay,
    Pause,
    MouseRefresh,
    IdleReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEntry {
    pub owner: TimerOwner,
    pub kind: TimerKind,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BTreeMap<(Instant, u64), (TimerOwner, TimerKind)>,
    index: HashMap<(TimerOwner, TimerKind), (Instant, u64)>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire no sooner than `deadline`, replacing any pending entry for the same key
    pub fn schedule(&mut self, owner: TimerOwner, kind: TimerKind, deadline: Instant) {
        self.cancel(owner, kind);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((deadline, seq), (owner, kind));
        self.index.insert((owner, kind), (deadline, seq));
    }

    pub fn cancel(&mut self, owner: TimerOwner, kind: TimerKind) -> bool {
        match self.index.remove(&(owner, kind)) {
            Some(slot) => {
                self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Drops every entry whose owner matches the predicate
    fn cancel_where(&mut self, predicate: impl Fn(&TimerOwner) -> bool) -> usize {
        let doomed: Vec<(TimerOwner, TimerKind)> = self
            .index
            .keys()
            .filter(|(owner, _)| predicate(owner))
            .copied()
            .collect();
        for (owner, kind) in &doomed {
            self.cancel(*owner, *kind);
        }
        doomed.len()
    }

    pub fn cancel_device(&mut self, device: DeviceId) -> usize {
        self.cancel_where(|owner| matches!(owner, TimerOwner::Button(key) if key.device == device))
    }

    pub fn is_scheduled(&self, owner: TimerOwner, kind: TimerKind) -> bool {
        self.index.contains_key(&(owner, kind))
    }

    pub fn deadline(&self, owner: TimerOwner, kind: TimerKind) -> Option<Instant> {
        self.index.get(&(owner, kind)).map(|(deadline, _)| *deadline)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns the earliest entry due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerEntry> {
        let (&(deadline, seq), _) = self.queue.iter().next()?;
        if deadline > now {
            return None;
        }
        let (owner, kind) = self.queue.remove(&(deadline, seq))?;
        self.index.remove(&(owner, kind));
        Some(TimerEntry {
            owner,
            kind,
            deadline,
        })
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
