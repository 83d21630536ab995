use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Handle to a scheduled entry, used to cancel it before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventToken(u64);

#[derive(Debug)]
struct Entry<T> {
    time: f64,
    seq: u64,
    payload: T,
}

// Custom Ord for a min-heap: the earliest (time, seq) pops first. `seq` is a
// monotonic insertion counter, so simultaneous entries dispatch in the order
// they were added.
impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A deterministic virtual-time event queue.
///
/// The clock only moves when an entry is popped, so a handler always observes
/// `current_time()` equal to its own scheduled time. Cancellation is lazy: a
/// cancelled entry stays in the heap and is skipped on pop.
#[derive(Debug)]
pub struct Scheduler<T> {
    time: f64,
    seq: u64,
    queue: BinaryHeap<Entry<T>>,
    cancelled: HashSet<u64>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            time: 0.0,
            seq: 0,
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
        }
    }

    /// Clear all state: queue empty, clock at zero, insertion counter at zero.
    pub fn reset(&mut self) {
        self.time = 0.0;
        self.seq = 0;
        self.queue.clear();
        self.cancelled.clear();
    }

    /// Schedule `payload` to fire `delay` seconds from the current time.
    ///
    /// Panics on a negative delay; that is a programmer error, not a
    /// simulation condition.
    pub fn add(&mut self, delay: f64, payload: T) -> EventToken {
        assert!(delay >= 0.0, "event scheduled with negative delay {delay}");
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Entry {
            time: self.time + delay,
            seq,
            payload,
        });
        EventToken(seq)
    }

    /// Mark the entry behind `token` inactive. Idempotent; cancelling an
    /// already-fired entry has no effect.
    pub fn cancel(&mut self, token: EventToken) {
        self.cancelled.insert(token.0);
    }

    /// The timestamp of the entry currently being dispatched.
    pub fn current_time(&self) -> f64 {
        self.time
    }

    /// Pop the next live entry, advancing the clock to its timestamp.
    pub fn pop(&mut self) -> Option<T> {
        while let Some(entry) = self.queue.pop() {
            if self.cancelled.remove(&entry.seq) {
                continue;
            }
            self.time = entry.time;
            return Some(entry.payload);
        }
        None
    }

    /// The timestamp of the next live entry, if any.
    pub fn peek_time(&mut self) -> Option<f64> {
        while let Some(entry) = self.queue.peek() {
            if self.cancelled.contains(&entry.seq) {
                let seq = entry.seq;
                self.queue.pop();
                self.cancelled.remove(&seq);
                continue;
            }
            return Some(entry.time);
        }
        None
    }

    pub fn is_empty(&mut self) -> bool {
        self.peek_time().is_none()
    }
}
