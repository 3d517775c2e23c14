//! Bounded probe history.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

use crate::probe::ProbeOutcome;

/// The most recent outcomes for one target, oldest first.
///
/// Holds at most `capacity` entries; pushing into a full window evicts the
/// oldest entry. Entries are never reordered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct History {
    capacity: usize,
    outcomes: VecDeque<ProbeOutcome>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            outcomes: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an outcome, returning the evicted one when the window was full.
    pub fn push(&mut self, outcome: ProbeOutcome) -> Option<ProbeOutcome> {
        let evicted = if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front()
        } else {
            None
        };
        self.outcomes.push_back(outcome);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ProbeOutcome> + ExactSizeIterator {
        self.outcomes.iter()
    }

    pub fn latest(&self) -> Option<&ProbeOutcome> {
        self.outcomes.back()
    }

    /// Latencies of the successful outcomes, in probe order.
    pub fn latencies(&self) -> impl DoubleEndedIterator<Item = Duration> + '_ {
        self.outcomes.iter().filter_map(ProbeOutcome::latency)
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }
}
