//! Discrete-event queue with a simulated clock.
//!
//! Events are popped in nondecreasing time order. Events scheduled for the
//! same instant come out in the order they were scheduled (FIFO tie-break),
//! which the DASH controller relies on when a segment arrival and a playback
//! tick coincide.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

/// Identity of a scheduled event, used to cancel it before it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// An event taken off the queue, together with its firing time.
#[derive(Debug)]
pub struct ScheduledEvent<E> {
    pub at_us: u64,
    pub id: TimerId,
    pub event: E,
}

struct Entry<E> {
    at_us: u64,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at_us == other.at_us && self.seq == other.seq
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    // Reversed so the max-heap yields the earliest (time, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at_us
            .cmp(&self.at_us)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of future events keyed by simulated time in microseconds.
pub struct EventQueue<E> {
    heap: BinaryHeap<Entry<E>>,
    pending: FxHashSet<u64>,
    next_seq: u64,
    now_us: u64,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: FxHashSet::default(),
            next_seq: 0,
            now_us: 0,
        }
    }

    /// Current simulated time: the firing time of the last popped event.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Schedule `event` at absolute time `at_us`.
    ///
    /// Times in the past are moved to the current instant; the clock never
    /// runs backwards.
    pub fn schedule_at(&mut self, at_us: u64, event: E) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            at_us: at_us.max(self.now_us),
            seq,
            event,
        });
        self.pending.insert(seq);
        TimerId(seq)
    }

    /// Schedule `event` `delay_us` microseconds from now.
    pub fn schedule_in(&mut self, delay_us: u64, event: E) -> TimerId {
        self.schedule_at(self.now_us.saturating_add(delay_us), event)
    }

    /// Cancel a pending event. Returns false if it already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id.0)
    }

    /// True if `id` is scheduled and has not fired yet.
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains(&id.0)
    }

    /// Pop the next live event and advance the clock to its firing time.
    pub fn pop(&mut self) -> Option<ScheduledEvent<E>> {
        while let Some(entry) = self.heap.pop() {
            if !self.pending.remove(&entry.seq) {
                continue;
            }
            self.now_us = entry.at_us;
            return Some(ScheduledEvent {
                at_us: entry.at_us,
                id: TimerId(entry.seq),
                event: entry.event,
            });
        }
        None
    }

    /// Firing time of the next live event, without popping it.
    pub fn peek_time(&mut self) -> Option<u64> {
        while let Some(entry) = self.heap.peek() {
            if self.pending.contains(&entry.seq) {
                return Some(entry.at_us);
            }
            self.heap.pop();
        }
        None
    }

    /// Number of live (not cancelled) events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_time_order() {
        let mut q = EventQueue::new();
        q.schedule_at(30, "c");
        q.schedule_at(10, "a");
        q.schedule_at(20, "b");

        let order: Vec<_> = std::iter::from_fn(|| q.pop().map(|e| e.event)).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(q.now_us(), 30);
    }

    #[test]
    fn equal_times_are_fifo() {
        let mut q = EventQueue::new();
        for i in 0..5 {
            q.schedule_at(100, i);
        }
        q.schedule_at(50, 99);

        let order: Vec<_> = std::iter::from_fn(|| q.pop().map(|e| e.event)).collect();
        assert_eq!(order, vec![99, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancelled_events_never_fire() {
        let mut q = EventQueue::new();
        let a = q.schedule_at(10, "a");
        q.schedule_at(20, "b");

        assert!(q.cancel(a));
        assert!(!q.cancel(a), "double cancel must report false");
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_time(), Some(20));

        let ev = q.pop().unwrap();
        assert_eq!(ev.event, "b");
        assert!(q.pop().is_none());
    }

    #[test]
    fn schedule_in_is_relative_to_clock() {
        let mut q = EventQueue::new();
        q.schedule_at(1_000, ());
        q.pop();
        let id = q.schedule_in(500, ());
        assert!(q.is_pending(id));
        assert_eq!(q.pop().unwrap().at_us, 1_500);
    }

    #[test]
    fn past_times_clamp_to_now() {
        let mut q = EventQueue::new();
        q.schedule_at(1_000, 1);
        q.pop();
        q.schedule_at(10, 2);
        let ev = q.pop().unwrap();
        assert_eq!(ev.at_us, 1_000);
        assert_eq!(q.now_us(), 1_000);
    }
}
