use std::collections::VecDeque;

use crate::message::Exchange;

/// Number of exchanges kept per user unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 5;

/// Bounded, ordered window over a user's most recent exchanges.
///
/// Oldest first. Pushing onto a full window evicts the front entry before the
/// new one is appended, so `len()` never exceeds `capacity()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryWindow {
    capacity: usize,
    exchanges: VecDeque<Exchange>,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryWindow {
    /// A zero capacity is bumped to one; an empty window would make every
    /// append a no-op.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            exchanges: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends `exchange`, returning the evicted entry if the window was full.
    pub fn push(&mut self, exchange: Exchange) -> Option<Exchange> {
        let evicted = if self.exchanges.len() >= self.capacity {
            self.exchanges.pop_front()
        } else {
            None
        };
        self.exchanges.push_back(exchange);
        evicted
    }

    pub fn to_vec(&self) -> Vec<Exchange> {
        self.exchanges.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}
