//! countwatchd - object-count monitor daemon
//!
//! This daemon:
//! 1. Connects to the ESP32 camera and keeps reconnecting while it runs
//! 2. Counts objects on sampled frames and debounces count changes
//! 3. Sends entering/leaving snapshots to Telegram when enabled
//! 4. Serves the annotated MJPEG feed, the count and the live settings
//!    over loopback HTTP

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use countwatch::{
    frame, ApiConfig, ApiServer, ApiState, CountwatchConfig, DetectionAdapter, DetectorBackend,
    DetectorKind, DetectorSettings, FeedStatus, HttpCamera, LiveSettings, LogNotifier,
    NotificationDispatcher, Notifier, SessionSupervisor, SharedFrameStore, Shutdown, StubBackend,
    TelegramNotifier,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Count objects on an ESP32 camera feed and notify on changes"
)]
struct Args {
    /// JSON config file.
    #[arg(long, env = "COUNTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Address for the HTTP API (overrides the config file).
    #[arg(long)]
    api_addr: Option<String>,

    /// Camera host or IP (overrides the config file and ESP_IP_ADDRESS).
    #[arg(long)]
    camera_host: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = CountwatchConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.api_addr {
        cfg.api_addr = addr;
    }
    if let Some(host) = args.camera_host {
        cfg.camera.host = host;
    }

    let shutdown = Shutdown::new();
    let settings = Arc::new(LiveSettings::new(cfg.settings.clone())?);
    let placeholder = frame::encode_jpeg(
        &frame::status_frame(
            cfg.session.display_width,
            cfg.session.display_height,
            FeedStatus::Connecting,
        ),
        frame::JPEG_QUALITY,
    )?;
    let store = Arc::new(SharedFrameStore::new(placeholder, FeedStatus::Connecting));

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
            ..ApiConfig::default()
        },
        ApiState {
            store: store.clone(),
            settings: settings.clone(),
        },
    )
    .spawn(shutdown.clone())?;
    log::info!("http api listening on {}", api_handle.addr);

    let notifier: Box<dyn Notifier> = match cfg.telegram.clone() {
        Some(telegram) => Box::new(TelegramNotifier::new(telegram)?),
        None => {
            log::warn!("telegram not configured; events will only be logged");
            Box::new(LogNotifier)
        }
    };
    let dispatcher = NotificationDispatcher::spawn(notifier, shutdown.clone())?;

    let camera = HttpCamera::new(&cfg.camera)?;
    let detector = DetectionAdapter::new(build_backend(&cfg.detector)?, cfg.detector.config.clone());
    let session = SessionSupervisor::new(
        Box::new(camera),
        detector,
        store,
        settings,
        cfg.session.clone(),
        shutdown.clone(),
    )?
    .with_notifier(dispatcher.sender())
    .spawn()?;

    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.trigger()).context("error setting Ctrl-C handler")?;

    log::info!("countwatchd running; waiting for shutdown signal (Ctrl-C)...");
    while !shutdown.wait_timeout(Duration::from_secs(1)) {}
    log::info!("shutdown signal received, stopping...");

    let stats = session.stop()?;
    dispatcher.stop()?;
    api_handle.stop()?;
    log::info!(
        "stopped after {} session(s), {} frame(s), {} event(s)",
        stats.sessions,
        stats.frames_extracted,
        stats.events
    );
    Ok(())
}

fn build_backend(detector: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match detector.kind {
        DetectorKind::Stub => {
            log::warn!("using stub detector; counts will stay at zero");
            Ok(Box::new(StubBackend::new()))
        }
        DetectorKind::Tract => build_tract(detector),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(detector: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let path = detector
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detector backend 'tract' requires model_path"))?;
    let backend = countwatch::TractBackend::new(
        path,
        detector.config.input_width,
        detector.config.input_height,
    )?;
    log::info!("loaded detector model {}", path.display());
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_detector: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector backend 'tract' requires building with --features backend-tract"
    ))
}
