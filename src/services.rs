//! Background service lifecycle management.
//!
//! `BackgroundServices` owns the tasks spawned by the runner, starting them
//! in dependency order and providing clean shutdown:
//! 1. Ticker (1s flush of pending bytes into the history)
//! 2. Event recorder (session transitions appended to the event log)
//! 3. Status reporter (snapshot feed for an external presentation layer)

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::config;
use crate::core::history::HistorySnapshot;
use crate::core::threshold::Severity;
use crate::core::traffic::{CounterSnapshot, TrafficCounter};
use crate::core::units::format_bytes;
use crate::db::Database;
use crate::session::SessionEvent;

/// One line of the status feed.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub interface: String,
    /// Total formatted in the configured display unit.
    pub display: String,
    #[serde(flatten)]
    pub counter: CounterSnapshot,
    pub history: HistorySnapshot,
}

impl StatusReport {
    pub fn capture(interface: &str, counter: &TrafficCounter) -> Self {
        let snapshot = counter.snapshot();
        Self {
            interface: interface.to_owned(),
            display: format_bytes(snapshot.total_bytes, snapshot.display_unit),
            counter: snapshot,
            history: counter.history(),
        }
    }

    /// Tooltip-style summary, e.g. `eth0: 1.500 kByte [normal]`.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} [{}]",
            self.interface, self.display, self.counter.severity
        )
    }
}

/// Manages all background work spawned during startup.
pub struct BackgroundServices {
    ticker: JoinHandle<()>,
    status_reporter: JoinHandle<()>,
    event_recorder: std::thread::JoinHandle<()>,
}

impl BackgroundServices {
    /// Start all background services. Must be called inside a tokio runtime.
    pub fn start(
        counter: &Arc<TrafficCounter>,
        database: &Arc<Database>,
        events: broadcast::Receiver<SessionEvent>,
        interface: String,
    ) -> anyhow::Result<Self> {
        let ticker = Self::start_ticker(Arc::clone(counter));
        let event_recorder = Self::start_event_recorder(Arc::clone(database), events)?;
        let status_reporter = Self::start_status_reporter(Arc::clone(counter), interface);
        Ok(Self {
            ticker,
            status_reporter,
            event_recorder,
        })
    }

    /// Stop the periodic tasks and wait for the event recorder to drain.
    ///
    /// The recorder exits once every `SessionController` (the event sender)
    /// has been dropped.
    pub async fn shutdown(self) {
        self.ticker.abort();
        self.status_reporter.abort();
        let recorder = self.event_recorder;
        match tokio::task::spawn_blocking(move || recorder.join()).await {
            Ok(Ok(())) => {}
            _ => tracing::error!("Event recorder thread panicked"),
        }
    }

    fn start_ticker(counter: Arc<TrafficCounter>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(config::TICK_INTERVAL_SECS));
            // The first tick completes immediately; the first flush is one interval in.
            interval.tick().await;
            let mut last_severity = None;
            loop {
                interval.tick().await;
                let Some(severity) = counter.tick() else {
                    continue;
                };
                if last_severity != Some(severity) {
                    log_severity_change(severity, counter.snapshot().total_bytes);
                    last_severity = Some(severity);
                }
            }
        })
    }

    fn start_event_recorder(
        database: Arc<Database>,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> anyhow::Result<std::thread::JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name("event-recorder".into())
            .spawn(move || {
                let mut recorded = 0u64;
                loop {
                    let event = match events.blocking_recv() {
                        Ok(event) => event,
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!("Event recorder fell behind; {missed} event(s) lost");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if let Err(e) = database.append_event(&event) {
                        tracing::warn!("Failed to record {} event: {e:#}", event.kind);
                    }

                    recorded += 1;
                    if recorded % config::EVENT_PRUNE_EVERY == 0 {
                        if let Err(e) = database.prune_events(config::EVENT_LOG_MAX_AGE_DAYS) {
                            tracing::warn!("Failed to prune event log: {e:#}");
                        }
                    }
                }
            })?;
        Ok(handle)
    }

    fn start_status_reporter(counter: Arc<TrafficCounter>, interface: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(config::STATUS_INTERVAL_SECS));
            loop {
                interval.tick().await;
                let report = StatusReport::capture(&interface, &counter);
                tracing::debug!("{}", report.summary());
                match serde_json::to_string(&report) {
                    Ok(line) => {
                        let mut stdout = std::io::stdout().lock();
                        if let Err(e) = writeln!(stdout, "{line}") {
                            tracing::warn!("Failed to write status line: {e}");
                        }
                    }
                    Err(e) => tracing::warn!("Failed to serialize status report: {e}"),
                }
            }
        })
    }
}

fn log_severity_change(severity: Severity, total_bytes: u64) {
    match severity {
        Severity::Critical => tracing::warn!("Beyond hard limit: {total_bytes} bytes"),
        Severity::Warning => tracing::warn!("Beyond soft limit: {total_bytes} bytes"),
        Severity::Normal => tracing::debug!("Within limits: {total_bytes} bytes"),
    }
}
