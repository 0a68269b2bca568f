//! Shared traffic accumulator guarded by a single mutex.
//!
//! The capture producer calls [`CaptureSession::record`] once per packet; the
//! ticker drains the pending bytes into the history once per second; the
//! presentation layer reads [`CounterSnapshot`]s. All of them take the same
//! lock, so every call observes a fully updated state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::config::{Settings, DEFAULT_HARD_LIMIT, DEFAULT_SOFT_LIMIT};
use crate::core::history::{HistorySnapshot, RingHistory};
use crate::core::threshold::{classify, Severity};
use crate::core::units::DisplayUnit;
use crate::error::MeterError;

#[derive(Debug)]
struct CounterState {
    total_bytes: u64,
    bytes_pending: u64,
    soft_limit: u64,
    hard_limit: u64,
    display_unit: DisplayUnit,
    running: bool,
    /// Bumped on every start so a producer from an earlier session can
    /// tell it has been superseded.
    generation: u64,
    history: RingHistory,
}

impl CounterState {
    fn severity(&self) -> Severity {
        classify(self.total_bytes, self.soft_limit, self.hard_limit)
    }

    fn accumulate(&mut self, len: u32) {
        self.total_bytes += u64::from(len);
        self.bytes_pending += u64::from(len);
    }
}

/// Point-in-time view of the counter, consistent as of one lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total_bytes: u64,
    /// Bytes observed since the last tick.
    pub bytes_pending: u64,
    pub severity: Severity,
    pub running: bool,
    pub display_unit: DisplayUnit,
    pub soft_limit: u64,
    pub hard_limit: u64,
}

/// Thread-safe byte counter owning the rolling history.
#[derive(Debug)]
pub struct TrafficCounter {
    state: Mutex<CounterState>,
}

impl TrafficCounter {
    pub fn new(history_capacity: usize) -> Result<Self, MeterError> {
        let history = RingHistory::new(history_capacity)?;
        Ok(Self {
            state: Mutex::new(CounterState {
                total_bytes: 0,
                bytes_pending: 0,
                soft_limit: DEFAULT_SOFT_LIMIT,
                hard_limit: DEFAULT_HARD_LIMIT,
                display_unit: DisplayUnit::Auto,
                running: false,
                generation: 0,
                history,
            }),
        })
    }

    // Every critical section below leaves the state consistent, so a
    // poisoned lock still guards valid data.
    fn lock(&self) -> MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add one packet's length to the total and to the pending interval.
    pub fn record(&self, len: u32) {
        self.lock().accumulate(len);
    }

    /// Zero the counters and clear the history. Run state is untouched.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.total_bytes = 0;
        state.bytes_pending = 0;
        state.history.clear();
    }

    /// Replace both thresholds. `soft <= hard` is the caller's responsibility.
    pub fn set_limits(&self, soft: u64, hard: u64) {
        let mut state = self.lock();
        state.soft_limit = soft;
        state.hard_limit = hard;
    }

    pub fn set_unit(&self, unit: DisplayUnit) {
        self.lock().display_unit = unit;
    }

    /// Apply persisted counters and preferences. Pending bytes and the
    /// history are transient and start from zero.
    pub fn restore(&self, settings: &Settings) {
        let mut state = self.lock();
        state.total_bytes = settings.total_bytes;
        state.bytes_pending = 0;
        state.soft_limit = settings.soft_limit;
        state.hard_limit = settings.hard_limit;
        state.display_unit = settings.display_unit;
        state.history.clear();
    }

    /// Mark a session as running and hand out the handle its producer uses.
    pub fn start(self: &Arc<Self>) -> Result<CaptureSession, MeterError> {
        let mut state = self.lock();
        if state.running {
            return Err(MeterError::AlreadyRunning);
        }
        state.running = true;
        state.generation += 1;
        Ok(CaptureSession {
            counter: Arc::clone(self),
            generation: state.generation,
        })
    }

    /// Mark the session stopped. The producer notices on its next packet.
    pub fn stop(&self) -> Result<(), MeterError> {
        let mut state = self.lock();
        if !state.running {
            return Err(MeterError::NotRunning);
        }
        state.running = false;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Drain the pending bytes into the history.
    ///
    /// Returns the severity after the flush, or `None` (and changes nothing)
    /// when no session is running.
    pub fn tick(&self) -> Option<Severity> {
        let mut state = self.lock();
        if !state.running {
            return None;
        }
        let sample = std::mem::take(&mut state.bytes_pending);
        state.history.push(sample);
        Some(state.severity())
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let state = self.lock();
        CounterSnapshot {
            total_bytes: state.total_bytes,
            bytes_pending: state.bytes_pending,
            severity: state.severity(),
            running: state.running,
            display_unit: state.display_unit,
            soft_limit: state.soft_limit,
            hard_limit: state.hard_limit,
        }
    }

    pub fn history(&self) -> HistorySnapshot {
        self.lock().history.snapshot()
    }

    pub fn history_capacity(&self) -> usize {
        self.lock().history.capacity()
    }

    /// Replace the history with an empty one of a new size, e.g. after the
    /// graph it feeds was resized. Old samples are discarded.
    pub fn resize_history(&self, capacity: usize) -> Result<(), MeterError> {
        let history = RingHistory::new(capacity)?;
        self.lock().history = history;
        Ok(())
    }
}

/// Handle held by one capture producer for the lifetime of its session.
#[derive(Debug)]
pub struct CaptureSession {
    counter: Arc<TrafficCounter>,
    generation: u64,
}

impl CaptureSession {
    fn is_current(&self, state: &CounterState) -> bool {
        state.running && state.generation == self.generation
    }

    /// Record one packet if this session is still the active one.
    ///
    /// Returns `false` once the session has been stopped or superseded; the
    /// producer must exit its loop then. The check and the update happen
    /// under one lock, so a packet is either fully counted or not at all.
    pub fn record(&self, len: u32) -> bool {
        let mut state = self.counter.lock();
        if !self.is_current(&state) {
            return false;
        }
        state.accumulate(len);
        true
    }

    pub fn is_active(&self) -> bool {
        self.is_current(&self.counter.lock())
    }

    /// End the session from the producer side (e.g. the source failed).
    ///
    /// Returns `true` if this call performed the `Running -> Stopped`
    /// transition, `false` if the session had already been stopped or
    /// superseded.
    pub fn abandon(&self) -> bool {
        let mut state = self.counter.lock();
        if !self.is_current(&state) {
            return false;
        }
        state.running = false;
        true
    }

    pub fn counter(&self) -> &Arc<TrafficCounter> {
        &self.counter
    }
}
