//! TrafficMeter: counts bytes seen on a network interface, classifies the
//! running total against soft/hard limits, and keeps a rolling per-second
//! history for a bar graph.
//!
//! The library exposes the engine ([`core`], [`session`]) and its
//! collaborators ([`capture`], [`db`], [`services`]); [`run`] wires them
//! into a headless meter.

pub mod capture;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod services;
pub mod session;

use std::sync::Arc;

use anyhow::Context;

use crate::config::Settings;
use crate::core::traffic::TrafficCounter;
use crate::services::BackgroundServices;
use crate::session::{SessionController, SessionEventKind};

pub use crate::error::MeterError;

/// Run the meter until Ctrl-C, capturing on the interface named by the
/// first command-line argument (or the one saved from the previous run).
pub fn run() -> anyhow::Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in TrafficMeter: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trafficmeter=info,trafficmeter_lib=info".into()),
        )
        .init();

    let requested_interface = std::env::args().nth(1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run_meter(requested_interface))
}

async fn run_meter(requested_interface: Option<String>) -> anyhow::Result<()> {
    let data_dir = config::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join(config::DATABASE_FILE);
    let database = Arc::new(db::Database::open(&db_path).context("Failed to open SQLite database")?);
    tracing::info!("Database opened at {}", db_path.display());

    match database.last_event() {
        Ok(Some(last)) if last.kind == SessionEventKind::Quit => {
            tracing::info!("Previous run quit at {} with {} bytes", last.timestamp, last.total_bytes);
        }
        Ok(Some(last)) => tracing::warn!(
            "Previous run ended without QUIT (last event {} at {}, {} bytes)",
            last.kind,
            last.timestamp,
            last.total_bytes
        ),
        Ok(None) => tracing::debug!("Event log is empty"),
        Err(e) => tracing::warn!("Failed to read event log: {e:#}"),
    }

    let settings = match database.load_settings() {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            tracing::info!("No saved settings, using defaults");
            Settings::default()
        }
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {e:#}");
            Settings::default()
        }
    };

    let counter = Arc::new(TrafficCounter::new(config::DEFAULT_HISTORY_CAPACITY)?);
    let mut controller = SessionController::new(Arc::clone(&counter), capture::platform_backend());
    if let Err(e) = controller.refresh_interfaces() {
        tracing::warn!("Couldn't create device list: {e}");
    }
    controller.restore(&settings);
    if let Some(name) = requested_interface.as_deref() {
        controller
            .select_interface_by_name(name)
            .with_context(|| format!("interface {name} not found"))?;
    }

    let interface = controller
        .selected_interface()
        .unwrap_or("(none)")
        .to_owned();
    let services = BackgroundServices::start(
        &counter,
        &database,
        controller.subscribe(),
        interface.clone(),
    )?;

    let started = controller.start();
    match &started {
        Ok(()) => {
            tracing::info!("TrafficMeter counting on {interface}; press Ctrl-C to quit");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
        }
        Err(e) => tracing::error!("Unable to start counting on {interface}: {e}"),
    }

    let final_settings = controller.shutdown();
    drop(controller);
    services.shutdown().await;

    database
        .save_settings(&final_settings)
        .context("Unable to save settings")?;
    tracing::info!("Settings saved; total {} bytes", final_settings.total_bytes);

    started.map_err(Into::into)
}
