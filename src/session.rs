//! Session orchestration: start/stop/reset transitions and the tick.
//!
//! `SessionController` owns the interface selection and the running
//! [`CaptureEngine`], and broadcasts a [`SessionEvent`] for every transition
//! so an external logger can record it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::capture::{CaptureBackend, CaptureEngine};
use crate::config::{Settings, EVENT_CHANNEL_CAPACITY};
use crate::core::history::HistorySnapshot;
use crate::core::threshold::Severity;
use crate::core::traffic::{CounterSnapshot, TrafficCounter};
use crate::core::units::DisplayUnit;
use crate::db::unix_timestamp;
use crate::error::MeterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionEventKind {
    Start,
    Stop,
    Reset,
    Quit,
}

impl SessionEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEventKind::Start => "START",
            SessionEventKind::Stop => "STOP",
            SessionEventKind::Reset => "RESET",
            SessionEventKind::Quit => "QUIT",
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(SessionEventKind::Start),
            "STOP" => Ok(SessionEventKind::Stop),
            "RESET" => Ok(SessionEventKind::Reset),
            "QUIT" => Ok(SessionEventKind::Quit),
            other => Err(format!("unknown session event: {other}")),
        }
    }
}

/// A transition notification: what happened, when, and the total afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub total_bytes: u64,
}

pub struct SessionController {
    counter: Arc<TrafficCounter>,
    backend: Arc<dyn CaptureBackend>,
    interfaces: Vec<String>,
    selected: Option<usize>,
    engine: Option<CaptureEngine>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Create a stopped controller. Call [`refresh_interfaces`] to populate
    /// the interface list.
    ///
    /// [`refresh_interfaces`]: SessionController::refresh_interfaces
    pub fn new(counter: Arc<TrafficCounter>, backend: Arc<dyn CaptureBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            counter,
            backend,
            interfaces: Vec::new(),
            selected: None,
            engine: None,
            events,
        }
    }

    pub fn counter(&self) -> &Arc<TrafficCounter> {
        &self.counter
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        if self.counter.is_running() {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    // ---- Interface selection ----

    /// Re-enumerate interfaces, keeping the current selection if its name
    /// is still present.
    pub fn refresh_interfaces(&mut self) -> Result<(), MeterError> {
        let previous = self.selected_interface().map(str::to_owned);
        let interfaces = self
            .backend
            .list_interfaces()
            .map_err(|e| MeterError::Io(format!("{e:#}")))?;

        tracing::info!(
            "{} interface(s) available via {}: {}",
            interfaces.len(),
            self.backend.name(),
            interfaces.join(", ")
        );

        self.selected = match previous {
            Some(name) => interfaces.iter().position(|i| *i == name),
            None if interfaces.is_empty() => None,
            None => Some(0),
        };
        self.interfaces = interfaces;
        Ok(())
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn selected_interface(&self) -> Option<&str> {
        self.selected
            .and_then(|i| self.interfaces.get(i))
            .map(String::as_str)
    }

    /// Choose the interface the next session captures on. Not allowed while
    /// a session is running.
    pub fn select_interface(&mut self, index: usize) -> Result<(), MeterError> {
        if self.counter.is_running() {
            return Err(MeterError::AlreadyRunning);
        }
        if index >= self.interfaces.len() {
            return Err(MeterError::NoInterfaceSelected);
        }
        self.selected = Some(index);
        Ok(())
    }

    pub fn select_interface_by_name(&mut self, name: &str) -> Result<(), MeterError> {
        let index = self
            .interfaces
            .iter()
            .position(|i| i == name)
            .ok_or(MeterError::NoInterfaceSelected)?;
        self.select_interface(index)
    }

    // ---- Transitions ----

    /// `Stopped -> Running`: open the selected interface and spawn its producer.
    ///
    /// On failure the controller stays `Stopped` and the counter is untouched.
    pub fn start(&mut self) -> Result<(), MeterError> {
        if self.counter.is_running() {
            return Err(MeterError::AlreadyRunning);
        }
        self.reap_engine();

        let interface = self
            .selected_interface()
            .ok_or(MeterError::NoInterfaceSelected)?
            .to_owned();

        let source = self.backend.open(&interface).map_err(|e| {
            tracing::warn!("Capture open failed on {interface}: {e:#}");
            MeterError::CaptureOpenFailed(format!("{e:#}"))
        })?;

        let session = self.counter.start()?;
        let events = self.events.clone();
        let counter = Arc::clone(&self.counter);
        let on_source_lost = move || {
            tracing::warn!("Counting stopped: capture source lost");
            send_event(&events, &counter, SessionEventKind::Stop);
        };
        let engine = match CaptureEngine::spawn(&interface, source, session, on_source_lost) {
            Ok(engine) => engine,
            Err(e) => {
                // The session handle died with the closure; undo the start.
                let _ = self.counter.stop();
                return Err(MeterError::CaptureOpenFailed(format!(
                    "failed to spawn capture thread: {e:#}"
                )));
            }
        };
        self.engine = Some(engine);

        tracing::info!("Counting started on {interface}");
        self.emit(SessionEventKind::Start);
        Ok(())
    }

    /// `Running -> Stopped`: signal the producer and wait for it to exit.
    pub fn stop(&mut self) -> Result<(), MeterError> {
        self.counter.stop()?;
        if let Some(engine) = self.engine.take() {
            engine.stop();
        }
        tracing::info!("Counting stopped");
        self.emit(SessionEventKind::Stop);
        Ok(())
    }

    /// Zero counters and history in either state.
    pub fn reset(&self) {
        self.counter.reset();
        tracing::info!("Counter reset");
        self.emit(SessionEventKind::Reset);
    }

    /// Flush the bytes seen since the previous tick into the history.
    /// A tick while stopped does nothing and returns `None`.
    pub fn tick(&self) -> Option<Severity> {
        self.counter.tick()
    }

    // ---- Configuration and reads ----

    pub fn set_limits(&self, soft: u64, hard: u64) {
        if soft > hard {
            tracing::warn!("Soft limit {soft} is above hard limit {hard}; warnings will never show");
        }
        self.counter.set_limits(soft, hard);
    }

    pub fn set_unit(&self, unit: DisplayUnit) {
        self.counter.set_unit(unit);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.counter.snapshot()
    }

    pub fn history(&self) -> HistorySnapshot {
        self.counter.history()
    }

    pub fn resize_history(&self, capacity: usize) -> Result<(), MeterError> {
        self.counter.resize_history(capacity)
    }

    /// Apply persisted settings. The stored device index is only honoured
    /// when it names an enumerated interface.
    pub fn restore(&mut self, settings: &Settings) {
        self.counter.restore(settings);
        self.selected = (settings.device_index < self.interfaces.len())
            .then_some(settings.device_index);
    }

    /// Values to persist.
    pub fn settings(&self) -> Settings {
        let snap = self.counter.snapshot();
        Settings {
            total_bytes: snap.total_bytes,
            display_unit: snap.display_unit,
            device_index: self.selected.unwrap_or(0),
            soft_limit: snap.soft_limit,
            hard_limit: snap.hard_limit,
        }
    }

    /// Stop any running session, announce `Quit`, and return the settings
    /// to persist.
    pub fn shutdown(&mut self) -> Settings {
        if self.counter.is_running() {
            if let Err(e) = self.stop() {
                tracing::warn!("Stop during shutdown failed: {e}");
            }
        }
        if let Some(engine) = self.engine.take() {
            engine.stop();
        }
        self.emit(SessionEventKind::Quit);
        self.settings()
    }

    /// Join a producer that ended on its own (e.g. its source failed).
    fn reap_engine(&mut self) {
        if let Some(engine) = self.engine.take() {
            if !engine.is_finished() {
                tracing::warn!("Previous capture thread still running; waiting for it");
            }
            engine.stop();
        }
    }

    fn emit(&self, kind: SessionEventKind) {
        send_event(&self.events, &self.counter, kind);
    }
}

fn send_event(
    events: &broadcast::Sender<SessionEvent>,
    counter: &TrafficCounter,
    kind: SessionEventKind,
) {
    let event = SessionEvent {
        kind,
        timestamp: unix_timestamp(),
        total_bytes: counter.snapshot().total_bytes,
    };
    tracing::debug!("{}: bytes = {}", event.kind, event.total_bytes);
    // No subscribers is fine: the event log is optional.
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::capture::replay::{PacketFeeder, ReplayBackend};

    fn setup(interfaces: &[&str]) -> (SessionController, Arc<ReplayBackend>, PacketFeeder) {
        let backend = Arc::new(
            ReplayBackend::new(interfaces.iter().copied())
                .with_read_timeout(Duration::from_millis(10)),
        );
        let feeder = backend.feeder();
        let counter = Arc::new(TrafficCounter::new(4).unwrap());
        let mut controller =
            SessionController::new(counter, Arc::clone(&backend) as Arc<dyn CaptureBackend>);
        controller.refresh_interfaces().unwrap();
        (controller, backend, feeder)
    }

    fn wait_for_total(controller: &SessionController, expected: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.snapshot().total_bytes != expected {
            assert!(
                Instant::now() < deadline,
                "total stuck at {}, expected {expected}",
                controller.snapshot().total_bytes
            );
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_start_without_interfaces_fails() {
        let (mut controller, _backend, _feeder) = setup(&[]);
        assert!(matches!(
            controller.start(),
            Err(MeterError::NoInterfaceSelected)
        ));
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[test]
    fn test_open_failure_leaves_controller_stopped() {
        let (mut controller, backend, _feeder) = setup(&["eth0"]);
        controller.counter().record(77);
        backend.set_open_error(Some("permission denied"));

        let err = controller.start().unwrap_err();
        assert_eq!(err.kind(), "CaptureOpenFailed");
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(controller.snapshot().total_bytes, 77);

        // A retry after the cause is fixed succeeds.
        backend.set_open_error(None);
        controller.start().unwrap();
        assert_eq!(controller.state(), SessionState::Running);
        controller.stop().unwrap();
    }

    #[test]
    fn test_recorded_bytes_flush_on_tick() {
        let (mut controller, _backend, feeder) = setup(&["eth0"]);
        controller.start().unwrap();

        feeder.send(1000);
        feeder.send(500);
        wait_for_total(&controller, 1500);

        assert_eq!(controller.tick(), Some(Severity::Normal));
        let snap = controller.snapshot();
        assert_eq!(snap.total_bytes, 1500);
        assert_eq!(snap.bytes_pending, 0);
        assert_eq!(controller.history().samples, vec![1500, 0, 0, 0]);

        controller.stop().unwrap();
    }

    #[test]
    fn test_double_start_and_double_stop() {
        let (mut controller, _backend, feeder) = setup(&["eth0"]);
        controller.start().unwrap();
        feeder.send(10);
        wait_for_total(&controller, 10);

        assert!(matches!(
            controller.start(),
            Err(MeterError::AlreadyRunning)
        ));
        assert_eq!(controller.state(), SessionState::Running);
        assert_eq!(controller.snapshot().total_bytes, 10);

        controller.stop().unwrap();
        assert!(matches!(controller.stop(), Err(MeterError::NotRunning)));
    }

    #[test]
    fn test_packets_after_stop_are_not_counted() {
        let (mut controller, _backend, feeder) = setup(&["eth0"]);
        controller.start().unwrap();
        feeder.send(100);
        wait_for_total(&controller, 100);
        controller.stop().unwrap();

        feeder.send(999);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(controller.snapshot().total_bytes, 100);
        assert_eq!(controller.tick(), None);

        // The queued packet is picked up by the next session.
        controller.start().unwrap();
        wait_for_total(&controller, 1099);
        controller.stop().unwrap();
    }

    #[test]
    fn test_source_failure_ends_session_and_allows_restart() {
        let (mut controller, _backend, feeder) = setup(&["eth0"]);
        let mut events = controller.subscribe();
        controller.start().unwrap();
        feeder.send(100);
        wait_for_total(&controller, 100);
        feeder.fail("interface went down");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while received.len() < 2 {
            assert!(Instant::now() < deadline, "events so far: {received:?}");
            match events.try_recv() {
                Ok(event) => received.push(event),
                Err(_) => std::thread::sleep(Duration::from_millis(2)),
            }
        }
        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(received[0].kind, SessionEventKind::Start);
        assert_eq!(received[1].kind, SessionEventKind::Stop);
        assert_eq!(received[1].total_bytes, 100);

        // The session already ended; an explicit stop has nothing to do.
        assert!(matches!(controller.stop(), Err(MeterError::NotRunning)));

        controller.start().unwrap();
        feeder.send(5);
        wait_for_total(&controller, 105);
        controller.stop().unwrap();
    }

    struct BrokenBackend;

    impl CaptureBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn list_interfaces(&self) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("cannot read /sys/class/net")
        }

        fn open(&self, interface: &str) -> anyhow::Result<Box<dyn crate::capture::PacketSource>> {
            anyhow::bail!("cannot open {interface}")
        }
    }

    #[test]
    fn test_enumeration_failure_is_io_error() {
        let counter = Arc::new(TrafficCounter::new(4).unwrap());
        let mut controller = SessionController::new(counter, Arc::new(BrokenBackend));

        let err = controller.refresh_interfaces().unwrap_err();
        assert_eq!(err.kind(), "Io");
        assert!(err.to_string().contains("/sys/class/net"));
        assert!(controller.interfaces().is_empty());
        assert!(matches!(
            controller.start(),
            Err(MeterError::NoInterfaceSelected)
        ));
    }

    #[test]
    fn test_reset_keeps_state() {
        let (mut controller, _backend, feeder) = setup(&["eth0"]);
        controller.start().unwrap();
        feeder.send(300);
        wait_for_total(&controller, 300);
        controller.tick();

        controller.reset();
        assert_eq!(controller.state(), SessionState::Running);
        assert_eq!(controller.snapshot().total_bytes, 0);
        assert_eq!(controller.history().max, 0);

        controller.stop().unwrap();
        controller.reset();
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[test]
    fn test_transitions_are_broadcast() {
        let (mut controller, _backend, feeder) = setup(&["eth0"]);
        let mut events = controller.subscribe();

        controller.start().unwrap();
        feeder.send(2048);
        wait_for_total(&controller, 2048);
        controller.stop().unwrap();
        controller.reset();
        let settings = controller.shutdown();
        assert_eq!(settings.total_bytes, 0);

        let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        let kinds: Vec<_> = received.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SessionEventKind::Start,
                SessionEventKind::Stop,
                SessionEventKind::Reset,
                SessionEventKind::Quit,
            ]
        );
        assert_eq!(received[0].total_bytes, 0);
        assert_eq!(received[1].total_bytes, 2048);
        assert_eq!(received[2].total_bytes, 0);
    }

    #[test]
    fn test_shutdown_stops_running_session() {
        let (mut controller, _backend, feeder) = setup(&["eth0", "wlan0"]);
        controller.select_interface(1).unwrap();
        controller.start().unwrap();
        feeder.send(64);
        wait_for_total(&controller, 64);

        let settings = controller.shutdown();
        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(settings.total_bytes, 64);
        assert_eq!(settings.device_index, 1);
    }

    #[test]
    fn test_interface_selection() {
        let (mut controller, _backend, _feeder) = setup(&["eth0", "wlan0"]);
        assert_eq!(controller.selected_interface(), Some("eth0"));

        controller.select_interface_by_name("wlan0").unwrap();
        assert_eq!(controller.selected_interface(), Some("wlan0"));

        assert!(matches!(
            controller.select_interface(5),
            Err(MeterError::NoInterfaceSelected)
        ));
        assert!(matches!(
            controller.select_interface_by_name("ppp0"),
            Err(MeterError::NoInterfaceSelected)
        ));

        controller.start().unwrap();
        assert!(matches!(
            controller.select_interface(0),
            Err(MeterError::AlreadyRunning)
        ));
        controller.stop().unwrap();
    }

    #[test]
    fn test_restore_and_settings_roundtrip() {
        let (mut controller, _backend, _feeder) = setup(&["eth0", "wlan0"]);
        let saved = Settings {
            total_bytes: 5_000,
            display_unit: DisplayUnit::Kilobyte,
            device_index: 1,
            soft_limit: 1_000,
            hard_limit: 10_000,
        };
        controller.restore(&saved);
        assert_eq!(controller.selected_interface(), Some("wlan0"));
        assert_eq!(controller.settings(), saved);
        assert_eq!(controller.snapshot().severity, Severity::Warning);

        // An index past the end selects nothing.
        controller.restore(&Settings {
            device_index: 7,
            ..saved
        });
        assert_eq!(controller.selected_interface(), None);
        assert!(matches!(
            controller.start(),
            Err(MeterError::NoInterfaceSelected)
        ));
        assert_eq!(controller.settings().device_index, 0);
    }

    #[test]
    fn test_stray_tick_while_stopped_is_noop() {
        let (controller, _backend, _feeder) = setup(&["eth0"]);
        controller.counter().record(10);
        assert_eq!(controller.tick(), None);
        assert_eq!(controller.snapshot().bytes_pending, 10);
        assert_eq!(controller.history().samples, vec![0; 4]);
    }

    #[test]
    fn test_event_kind_parse() {
        for kind in [
            SessionEventKind::Start,
            SessionEventKind::Stop,
            SessionEventKind::Reset,
            SessionEventKind::Quit,
        ] {
            assert_eq!(kind.as_str().parse::<SessionEventKind>(), Ok(kind));
        }
        assert!("PAUSE".parse::<SessionEventKind>().is_err());
    }
}
