//! Core logic: traffic accounting, threshold classification, rolling history.
//!
//! - [`TrafficCounter`]: mutex-guarded byte counter shared with the capture producer
//! - [`RingHistory`]: fixed-size per-interval history with a cached maximum
//! - [`classify`] / [`Severity`]: soft/hard limit classification
//! - [`DisplayUnit`] / [`format_bytes`]: decimal unit formatting

pub mod history;
pub mod threshold;
pub mod traffic;
pub mod units;

pub use history::{HistorySnapshot, RingHistory};
pub use threshold::{classify, Severity};
pub use traffic::{CaptureSession, CounterSnapshot, TrafficCounter};
pub use units::{format_bytes, DisplayUnit};
