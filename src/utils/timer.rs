use std::{collections::BTreeMap, time::Duration};

use parse_display::Display;
use slabmap::SlabMap;

#[cfg(test)]
mod tests;

/// Handle to a scheduled timer.
///
/// Ids are unique for the lifetime of the [`Timers`] that issued them, so a
/// cancelled or fired id never matches a later timer.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("timer#{seq}")]
pub struct TimerId {
    slot: usize,
    seq: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    deadline: Duration,
    seq: u64,
}

struct Entry {
    key: Key,
}

/// Timer queue driven by a virtual clock.
///
/// The host event loop reports elapsed time with [`advance`](Self::advance),
/// which returns the timers that became due, in deadline order. Timers with the
/// same deadline fire in the order they were scheduled.
pub struct Timers {
    now: Duration,
    next_seq: u64,
    tasks: BTreeMap<Key, usize>,
    entries: SlabMap<Entry>,
}

impl Timers {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            tasks: BTreeMap::new(),
            entries: SlabMap::new(),
        }
    }

    /// Time elapsed since the queue was created.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Deadline of the earliest live timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.tasks.first_key_value().map(|(key, _)| key.deadline)
    }

    /// Schedule a timer firing `delay` from now.
    pub fn schedule(&mut self, delay: Duration) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = Key {
            deadline: self.now.saturating_add(delay),
            seq,
        };
        let slot = self.entries.insert(Entry { key });
        self.tasks.insert(key, slot);
        TimerId { slot, seq }
    }

    /// Cancel a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.entries.get(id.slot) {
            Some(e) if e.key.seq == id.seq => {
                let key = e.key;
                self.entries.remove(id.slot);
                self.tasks.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if `id` is scheduled and has not fired.
    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.entries
            .get(id.slot)
            .is_some_and(|e| e.key.seq == id.seq)
    }

    /// Move the clock forward by `elapsed` and return the timers that became due.
    pub fn advance(&mut self, elapsed: Duration) -> Vec<TimerId> {
        self.advance_to(self.now.saturating_add(elapsed))
    }

    /// Move the clock to `now` and return the timers that became due.
    ///
    /// The clock never moves backwards.
    pub fn advance_to(&mut self, now: Duration) -> Vec<TimerId> {
        if now > self.now {
            self.now = now;
        }
        let mut fired = Vec::new();
        while let Some(entry) = self.tasks.first_entry() {
            if entry.key().deadline > self.now {
                break;
            }
            let key = *entry.key();
            let slot = entry.remove();
            self.entries.remove(slot);
            tracing::trace!(seq = key.seq, "timer fired");
            fired.push(TimerId { slot, seq: key.seq });
        }
        fired
    }

    /// Cancel every timer.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.entries = SlabMap::new();
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}
