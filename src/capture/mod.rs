//! Packet capture: the producer side of the accounting engine.
//!
//! A [`CaptureBackend`] enumerates interfaces and opens a [`PacketSource`] on
//! one of them. [`CaptureEngine`] drives that source on a dedicated thread and
//! feeds every packet length into the active [`CaptureSession`].
//!
//! - Linux: raw `AF_PACKET` socket (`linux_backend`)
//! - Anywhere: in-memory replay feed (`replay`), used by tests and demos

#[cfg(target_os = "linux")]
pub mod linux_backend;

pub mod replay;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;

use crate::core::traffic::CaptureSession;

/// A blocking stream of packet lengths from one interface.
pub trait PacketSource: Send {
    /// Wait for the next packet.
    ///
    /// `Ok(Some(len))` is one packet of `len` bytes on the wire, `Ok(None)` a
    /// read timeout with nothing received. An error ends the capture.
    fn next_packet(&mut self) -> Result<Option<u32>>;
}

/// Opens packet sources on named interfaces.
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn list_interfaces(&self) -> Result<Vec<String>>;

    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>>;
}

/// Backend for platforms without a native capture implementation.
pub struct UnsupportedBackend;

impl CaptureBackend for UnsupportedBackend {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn list_interfaces(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>> {
        anyhow::bail!("packet capture is not supported on this platform (interface {interface})")
    }
}

/// The native backend for the current platform.
#[cfg(target_os = "linux")]
pub fn platform_backend() -> Arc<dyn CaptureBackend> {
    Arc::new(linux_backend::PacketSocketBackend::default())
}

/// The native backend for the current platform.
#[cfg(not(target_os = "linux"))]
pub fn platform_backend() -> Arc<dyn CaptureBackend> {
    Arc::new(UnsupportedBackend)
}

/// Manages the background capture thread of one session.
/// Implements Drop to signal the thread on early exit.
pub struct CaptureEngine {
    shutdown: Arc<AtomicBool>,
    capture_thread: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    /// Spawn the producer thread for `session`, reading from `source`.
    ///
    /// `on_source_lost` runs on the capture thread when a source failure
    /// ends the session, so the owner can announce the stop it did not ask for.
    pub fn spawn<F>(
        interface: &str,
        source: Box<dyn PacketSource>,
        session: CaptureSession,
        on_source_lost: F,
    ) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let interface_owned = interface.to_owned();

        let thread = std::thread::Builder::new()
            .name(format!("capture-{interface}"))
            .spawn(move || {
                if run_capture_loop(source, &session, &shutdown_clone) {
                    on_source_lost();
                }
                tracing::info!("Capture on {interface_owned} stopped");
            })?;

        tracing::info!("CaptureEngine started on {interface}");
        Ok(Self {
            shutdown,
            capture_thread: Some(thread),
        })
    }

    /// Signal the thread and wait for it to exit.
    ///
    /// The thread finishes the read in progress first, so this returns after
    /// at most one source read timeout.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.capture_thread.take() {
            if thread.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
    }

    /// Whether the thread has already left its loop (stopped or failed).
    pub fn is_finished(&self) -> bool {
        self.capture_thread
            .as_ref()
            .map_or(true, |thread| thread.is_finished())
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Producer loop: one `record` per packet until the session ends.
///
/// Returns `true` if a source failure ended the session.
fn run_capture_loop(
    mut source: Box<dyn PacketSource>,
    session: &CaptureSession,
    shutdown: &AtomicBool,
) -> bool {
    while !shutdown.load(Ordering::Relaxed) {
        match source.next_packet() {
            Ok(Some(len)) => {
                if !session.record(len) {
                    break;
                }
            }
            Ok(None) => {
                if !session.is_active() {
                    break;
                }
            }
            Err(e) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                tracing::error!("Capture source failed, ending session: {e:#}");
                return session.abandon();
            }
        }
    }
    false
}
