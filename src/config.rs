//! Centralized runtime constants and persisted settings for TrafficMeter.
//!
//! All tunable intervals, limits, and sizes are collected here so they can
//! be found and adjusted in a single place rather than scattered across modules.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::units::DisplayUnit;

/// Interval at which pending bytes are flushed into the history (seconds).
pub const TICK_INTERVAL_SECS: u64 = 1;

/// Interval at which the status reporter writes a snapshot line (seconds).
pub const STATUS_INTERVAL_SECS: u64 = 2;

/// Maximum time a capture read blocks before re-checking for cancellation (milliseconds).
pub const CAPTURE_READ_TIMEOUT_MS: u64 = 500;

/// Receive buffer length for raw capture sockets.
pub const CAPTURE_BUFFER_LEN: usize = 65535;

/// Default warning threshold (bytes).
pub const DEFAULT_SOFT_LIMIT: u64 = 1_800_000_000;

/// Default critical threshold (bytes).
pub const DEFAULT_HARD_LIMIT: u64 = 2_000_000_000;

/// Width of the history graph a renderer is expected to draw (pixels).
pub const GRAPH_WIDTH: usize = 100;

/// Width of one history bar (pixels).
pub const BAR_WIDTH: usize = 3;

/// History capacity: one sample per bar across the graph.
pub const DEFAULT_HISTORY_CAPACITY: usize = GRAPH_WIDTH / BAR_WIDTH;

/// Session events older than this are pruned from the event log (days).
pub const EVENT_LOG_MAX_AGE_DAYS: u64 = 365;

/// Number of recorded events between pruning checks.
pub const EVENT_PRUNE_EVERY: u64 = 64;

/// Capacity of the session-event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Name of the SQLite file inside the data directory.
pub const DATABASE_FILE: &str = "trafficmeter.db";

/// Settings restored at startup and written back at shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub total_bytes: u64,
    pub display_unit: DisplayUnit,
    /// Index into the interface list enumerated at startup.
    pub device_index: usize,
    pub soft_limit: u64,
    pub hard_limit: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            total_bytes: 0,
            display_unit: DisplayUnit::Auto,
            device_index: 0,
            soft_limit: DEFAULT_SOFT_LIMIT,
            hard_limit: DEFAULT_HARD_LIMIT,
        }
    }
}

/// Directory holding the database: `$TRAFFICMETER_DATA_DIR`, else
/// `$HOME/.trafficmeter`, else the working directory.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("TRAFFICMETER_DATA_DIR") {
        return PathBuf::from(dir);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".trafficmeter"),
        None => PathBuf::from("."),
    }
}
