//! Fixed-capacity ring buffer of per-interval byte totals.
//!
//! Inserts are O(1). The maximum is cached and only recomputed (O(capacity))
//! when the slot being overwritten held the current maximum.

use serde::Serialize;

use crate::error::MeterError;

/// Circular history of interval samples, sized once at construction.
#[derive(Debug, Clone)]
pub struct RingHistory {
    samples: Vec<u64>,
    /// Oldest retained sample.
    head: usize,
    /// Slot the next sample is written to.
    tail: usize,
    /// Number of slots written since the last clear, capped at capacity.
    len: usize,
    cached_max: u64,
}

/// Copy of the history for a renderer: newest sample first, always
/// `capacity` entries long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistorySnapshot {
    pub samples: Vec<u64>,
    pub max: u64,
}

impl RingHistory {
    pub fn new(capacity: usize) -> Result<Self, MeterError> {
        if capacity == 0 {
            return Err(MeterError::InvalidCapacity);
        }
        Ok(Self {
            samples: vec![0; capacity],
            head: 0,
            tail: 0,
            len: 0,
            cached_max: 0,
        })
    }

    /// Reset to the empty state: all slots zero, max zero.
    pub fn clear(&mut self) {
        self.samples.fill(0);
        self.head = 0;
        self.tail = 0;
        self.len = 0;
        self.cached_max = 0;
    }

    /// Insert one interval sample, evicting the oldest once full.
    pub fn push(&mut self, value: u64) {
        let capacity = self.samples.len();
        let evicted = std::mem::replace(&mut self.samples[self.tail], value);

        // The evicted value may have been the only copy of the maximum.
        if self.cached_max > 0 && evicted == self.cached_max {
            self.cached_max = self.samples.iter().copied().max().unwrap_or(0);
        }

        self.tail = (self.tail + 1) % capacity;
        if self.tail == self.head {
            self.head = (self.head + 1) % capacity;
        }
        self.len = (self.len + 1).min(capacity);

        if value > self.cached_max {
            self.cached_max = value;
        }
    }

    pub fn max(&self) -> u64 {
        self.cached_max
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Slots written since construction or the last clear, at most `capacity`.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Walk backwards from the most recent sample through every slot.
    ///
    /// Always yields exactly `capacity` values; slots never written read as 0.
    /// Each call starts a fresh walk.
    pub fn iter_newest_to_oldest(&self) -> impl Iterator<Item = u64> + '_ {
        let capacity = self.samples.len();
        let newest = (self.tail + capacity - 1) % capacity;
        (0..capacity).map(move |step| self.samples[(newest + capacity - step) % capacity])
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            samples: self.iter_newest_to_oldest().collect(),
            max: self.cached_max,
        }
    }
}
