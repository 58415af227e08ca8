use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Counter identifying one capture attempt. Stopping or restarting a capture
/// moves to a new generation, which makes every task of the old one stale.
pub type Generation = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Lives as long as the session.
    Session,
    /// Belongs to one capture attempt.
    Capture(Generation),
}

struct Entry<T> {
    due: f64,
    seq: u64,
    scope: Scope,
    task: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // reversed so the max-heap pops the earliest due time, then the earliest
    // scheduled among equal times
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .total_cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Deferred tasks on the output clock, run by the owner of the session
/// between ticks.
pub struct Timeline<T> {
    heap: BinaryHeap<Entry<T>>,
    seq: u64,
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }
}

impl<T> Timeline<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: f64, scope: Scope, task: T) {
        self.seq += 1;
        self.heap.push(Entry {
            due,
            seq: self.seq,
            scope,
            task,
        });
    }

    pub fn next_due(&self) -> Option<f64> {
        self.heap.peek().map(|entry| entry.due)
    }

    /// Removes and returns the earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<(Scope, T)> {
        if self.heap.peek()?.due > now {
            return None;
        }
        self.heap.pop().map(|entry| (entry.scope, entry.task))
    }

    /// Drops every pending task of one capture attempt.
    pub fn cancel_capture(&mut self, generation: Generation) -> usize {
        let before = self.heap.len();
        self.heap
            .retain(|entry| entry.scope != Scope::Capture(generation));
        before - self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_due_order_then_schedule_order() {
        let mut timeline = Timeline::new();
        timeline.schedule(2.0, Scope::Session, "late");
        timeline.schedule(1.0, Scope::Session, "first");
        timeline.schedule(1.0, Scope::Session, "second");
        assert_eq!(timeline.next_due(), Some(1.0));

        let mut order = Vec::new();
        while let Some((_, task)) = timeline.pop_due(5.0) {
            order.push(task);
        }
        assert_eq!(order, vec!["first", "second", "late"]);
    }

    #[test]
    fn nothing_pops_before_it_is_due() {
        let mut timeline = Timeline::new();
        timeline.schedule(1.0, Scope::Session, ());
        assert!(timeline.pop_due(0.999).is_none());
        assert!(timeline.pop_due(1.0).is_some());
        assert!(timeline.is_empty());
    }

    #[test]
    fn cancel_capture_only_touches_its_generation() {
        let mut timeline = Timeline::new();
        timeline.schedule(1.0, Scope::Capture(1), "old guard");
        timeline.schedule(2.0, Scope::Capture(1), "old stop");
        timeline.schedule(1.5, Scope::Capture(2), "new stop");
        timeline.schedule(1.2, Scope::Session, "pulse");

        assert_eq!(timeline.cancel_capture(1), 2);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.pop_due(9.0), Some((Scope::Session, "pulse")));
        assert_eq!(timeline.pop_due(9.0), Some((Scope::Capture(2), "new stop")));
    }
}
