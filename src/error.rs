//! Unified error type for the accounting engine.
//!
//! `MeterError` is returned by every counter, history and session operation.
//! It serializes as `{ "kind": "...", "message": "..." }` so a presentation
//! layer can programmatically distinguish error categories.

use serde::ser::SerializeStruct;

/// Engine-level error.
///
/// State-machine misuse (`AlreadyRunning`, `NotRunning`) is recoverable and
/// leaves the engine untouched. Capture failures surface at session start.
#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    /// A history buffer was requested with zero slots.
    #[error("history capacity must be at least 1")]
    InvalidCapacity,

    /// `start()` while a session is already active.
    #[error("a capture session is already running")]
    AlreadyRunning,

    /// `stop()` without an active session.
    #[error("no capture session is running")]
    NotRunning,

    /// No network interface has been chosen (or none exists).
    #[error("no network interface selected")]
    NoInterfaceSelected,

    /// The capture source could not be opened on the selected interface.
    #[error("{0}")]
    CaptureOpenFailed(String),

    /// Interface enumeration and other OS-level errors.
    #[error("{0}")]
    Io(String),
}

impl MeterError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            MeterError::InvalidCapacity => "InvalidCapacity",
            MeterError::AlreadyRunning => "AlreadyRunning",
            MeterError::NotRunning => "NotRunning",
            MeterError::NoInterfaceSelected => "NoInterfaceSelected",
            MeterError::CaptureOpenFailed(_) => "CaptureOpenFailed",
            MeterError::Io(_) => "Io",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for MeterError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("MeterError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}
