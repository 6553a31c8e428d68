//! LED wall controller entry point.
//!
//! Wires together the stores, the compositor, the card transport, the
//! schedule service, and the SDK command server, then parks on Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load ControllerConfig (TOML)
//!  └─ restore ProgramLibrary (programs, hwconfig)
//!  └─ start services
//!       ├─ Compositor       (frame ticks → watch channel)
//!       ├─ Transport        (watch channel → serial card link)
//!       ├─ ScheduleService  (switch times, brightness, 30 s cadence)
//!       └─ CommandServer    (SDK XML over TCP)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ledwall_controller::application::dispatch::Dispatcher;
use ledwall_controller::application::services::ScheduleService;
use ledwall_controller::application::store::{HwConfigStore, ProgramStore};
use ledwall_controller::infrastructure::network::CommandServer;
use ledwall_controller::infrastructure::storage::config::{config_path, load_config, save_config};
use ledwall_controller::infrastructure::storage::programs::ProgramLibrary;
use ledwall_controller::infrastructure::transport::link::SerialLinkFactory;
use ledwall_controller::infrastructure::transport::{status_channel, Transport};
use ledwall_controller::render::engine::{frame_channel, Compositor};
use ledwall_controller::render::plugins::{DataFeeds, VideoHub};
use ledwall_core::HardwareConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = config_path();
    let config = load_config(&path)?;

    // Structured logging.  The configured level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.controller.log_level.clone())),
        )
        .init();

    info!(config = %path.display(), "LED wall controller starting");

    // First boot: materialize the defaults so operators have a file to edit.
    if !path.exists() {
        save_config(&path, &config)?;
        info!(config = %path.display(), "default configuration written");
    }

    // ── Persistence ───────────────────────────────────────────────────────────
    let library = Arc::new(ProgramLibrary::new(
        config.storage.programs_dir(),
        config.storage.media_dir(),
        config.storage.staging_dir(),
        config.storage.hwconfig_path(),
    ));
    library.ensure_dirs()?;

    let hwconfig = Arc::new(HwConfigStore::new(match library.load_hwconfig() {
        Ok(Some(restored)) => restored,
        Ok(None) => HardwareConfig::default(),
        Err(e) => {
            warn!(error = %e, "hardware config unreadable, using defaults");
            HardwareConfig::default()
        }
    }));

    let programs = Arc::new(ProgramStore::new());
    let restored = library.load_programs(config.display.width, config.display.height);
    info!(count = restored.len(), "programs restored from disk");
    let mut first = None;
    for program in restored {
        let id = programs.load(program);
        first.get_or_insert(id);
    }
    // Resume showing something after a restart rather than a black wall.
    if let Some(id) = first {
        if let Err(e) = programs.switch_active(id) {
            warn!(%id, error = %e, "could not activate restored program");
        }
    }

    // ── Channels ──────────────────────────────────────────────────────────────
    let (frame_tx, frame_rx) = frame_channel(config.display.width, config.display.height);
    let (screen_tx, screen_rx) = tokio::sync::watch::channel(true);
    let (brightness_tx, brightness_rx) = tokio::sync::watch::channel(100u8);
    let (command_tx, command_rx) = tokio::sync::mpsc::channel(16);
    let (status_tx, status_rx) = status_channel();

    // ── Compositor ────────────────────────────────────────────────────────────
    let feeds = Arc::new(DataFeeds::new());
    let video = Arc::new(VideoHub::new());
    let compositor = Compositor::new(
        Arc::clone(&programs),
        Arc::clone(&hwconfig),
        Arc::clone(&feeds),
        Arc::clone(&video),
        config.storage.media_dir(),
        &config.display.fallback_color,
        config.display.width,
        config.display.height,
        frame_tx,
        screen_rx,
        brightness_rx,
    )?;
    tokio::spawn(compositor.run(config.display.fps));

    // ── Card transport ────────────────────────────────────────────────────────
    let factory = SerialLinkFactory {
        device: config.serial.device.clone(),
        baud: config.serial.baud,
    };
    let transport = Transport::new(
        factory,
        frame_rx,
        command_rx,
        status_tx,
        Duration::from_millis(config.serial.ack_timeout_ms),
        Duration::from_millis(config.serial.backoff_cap_ms),
    );
    tokio::spawn(transport.run());

    // ── Schedule service ──────────────────────────────────────────────────────
    let schedule = Arc::new(ScheduleService::new(
        Arc::clone(&hwconfig),
        screen_tx,
        brightness_tx,
    ));
    tokio::spawn(Arc::clone(&schedule).run());

    // ── SDK command server ────────────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(
        programs,
        hwconfig,
        schedule,
        Arc::clone(&library),
        command_tx,
        status_rx,
        config.display.width,
        config.display.height,
        config.controller.device_name.clone(),
        config.display.fps,
    ));
    let server = CommandServer::new(
        &config.network.bind_address,
        config.network.port,
        dispatcher,
        library,
    );
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "sdk server stopped");
        }
    });

    info!("LED wall controller ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping");
    Ok(())
}
