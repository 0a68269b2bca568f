//! In-memory capture backend fed through a channel.
//!
//! Lets a caller drive the engine with synthetic traffic: pick interface
//! names up front, then push packet lengths (or a failure) through a
//! [`PacketFeeder`]. Sessions opened on the backend share one feed.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::capture::{CaptureBackend, PacketSource};
use crate::config::CAPTURE_READ_TIMEOUT_MS;

type FeedItem = std::result::Result<u32, String>;

/// Sending half of a replay feed.
#[derive(Clone)]
pub struct PacketFeeder {
    tx: Sender<FeedItem>,
}

impl PacketFeeder {
    /// Deliver one packet of `len` bytes.
    pub fn send(&self, len: u32) -> bool {
        self.tx.send(Ok(len)).is_ok()
    }

    /// Make the next read fail, as if the interface went away.
    pub fn fail(&self, message: &str) -> bool {
        self.tx.send(Err(message.to_owned())).is_ok()
    }
}

pub struct ReplayBackend {
    interfaces: Vec<String>,
    tx: Sender<FeedItem>,
    rx: Arc<Mutex<Receiver<FeedItem>>>,
    open_error: Mutex<Option<String>>,
    read_timeout: Duration,
}

impl ReplayBackend {
    pub fn new<I, S>(interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = mpsc::channel();
        Self {
            interfaces: interfaces.into_iter().map(Into::into).collect(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            open_error: Mutex::new(None),
            read_timeout: Duration::from_millis(CAPTURE_READ_TIMEOUT_MS),
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn feeder(&self) -> PacketFeeder {
        PacketFeeder {
            tx: self.tx.clone(),
        }
    }

    /// Make every subsequent `open` fail with `message` (or succeed again with `None`).
    pub fn set_open_error(&self, message: Option<&str>) {
        *self
            .open_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = message.map(str::to_owned);
    }
}

impl CaptureBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn list_interfaces(&self) -> Result<Vec<String>> {
        Ok(self.interfaces.clone())
    }

    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>> {
        if let Some(message) = self
            .open_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
        {
            bail!("Couldn't open device {interface}: {message}");
        }
        if !self.interfaces.iter().any(|name| name == interface) {
            bail!("Couldn't open device {interface}: no such interface");
        }
        Ok(Box::new(ReplaySource {
            rx: Arc::clone(&self.rx),
            read_timeout: self.read_timeout,
        }))
    }
}

struct ReplaySource {
    rx: Arc<Mutex<Receiver<FeedItem>>>,
    read_timeout: Duration,
}

impl PacketSource for ReplaySource {
    fn next_packet(&mut self) -> Result<Option<u32>> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.recv_timeout(self.read_timeout) {
            Ok(Ok(len)) => Ok(Some(len)),
            Ok(Err(message)) => bail!("{message}"),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => bail!("replay feed closed"),
        }
    }
}
