use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use std::{
    env,
    fs::OpenOptions,
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::signal;

use testcard_server::models::Settings;
use testcard_server::server::{build_router, AppState};
use testcard_server::services::{
    apply_env_overrides, log_file_path, prune_logs, FFmpegHandler, SettingsManager,
};

// ============================================================================
// Logging
// ============================================================================

struct ServerLogger {
    file: Mutex<std::fs::File>,
    level: LevelFilter,
}

impl ServerLogger {
    fn new(log_dir: &Path, level: LevelFilter) -> Result<Self, Box<dyn std::error::Error>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path(log_dir))?;
        Ok(Self {
            file: Mutex::new(file),
            level,
        })
    }
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now();
        let date = timestamp.format("%Y-%m-%d");
        let time = timestamp.format("%H:%M:%S");
        let target = record.target();
        let level = record.level();
        let line = format!("[{date}][{time}][{target}][{level}] {}", record.args());

        if let Ok(mut file) = self.file.try_lock() {
            let _ = writeln!(file, "{line}");
        }
        eprintln!("{line}");
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

fn parse_level(value: Option<String>) -> LevelFilter {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(LevelFilter::Info)
}

fn init_logger(log_dir: &Path, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let logger = ServerLogger::new(log_dir, level)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn parse_host(host: &str) -> IpAddr {
    host.parse().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Graceful shutdown signal handler
/// Waits for Ctrl+C or SIGTERM, then stops every running stream
async fn shutdown_signal(ffmpeg_handler: Arc<FFmpegHandler>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("Shutdown signal received, stopping streams...");
    ffmpeg_handler.stop_all().await;
    log::info!("All streams stopped, server shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment
    let data_dir = env::var("TESTCARD_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let log_dir = env::var("TESTCARD_LOG_DIR").unwrap_or_else(|_| format!("{data_dir}/logs"));
    let log_level = parse_level(env::var("TESTCARD_LOG_LEVEL").ok());

    let app_data_dir = PathBuf::from(&data_dir);
    let log_dir_path = PathBuf::from(&log_dir);
    std::fs::create_dir_all(&app_data_dir)?;
    std::fs::create_dir_all(&log_dir_path)?;

    init_logger(&log_dir_path, log_level)?;

    let settings_manager = SettingsManager::new(app_data_dir);
    let mut settings: Settings = settings_manager.load_or_init()?;
    apply_env_overrides(&mut settings, |name| env::var(name).ok());
    settings.validate()?;

    match prune_logs(&log_dir_path, settings.log_retention_days) {
        Ok(removed) if !removed.is_empty() => log::info!("Pruned {} old log file(s)", removed.len()),
        Ok(_) => {}
        Err(e) => log::warn!("Log pruning failed: {e}"),
    }

    if settings.stream_key().is_none() {
        log::warn!("No stream key configured; /api/stream will reject launches until YOUTUBE_STREAM_KEY or streamKey is set");
    }
    log::info!(
        "Encoding profile: {}x{}@{} {}k, limit {}",
        settings.profile.width,
        settings.profile.height,
        settings.profile.frame_rate,
        settings.profile.video_bitrate_kbps,
        settings.profile.duration_label()
    );

    let state = AppState::from_settings(&settings);
    let ffmpeg_handler = Arc::clone(&state.ffmpeg_handler);
    match ffmpeg_handler.resolve_ffmpeg() {
        Ok(path) => log::info!("Using FFmpeg at {}", path.display()),
        Err(e) => log::warn!("{e}; stream launches will fail until FFmpeg is available"),
    }

    let app = build_router(state, &settings.cors_origins);

    let address = SocketAddr::new(parse_host(&settings.host), settings.port);
    log::info!("Testcard server listening on http://{address}");

    let listener = tokio::net::TcpListener::bind(address).await?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ffmpeg_handler))
        .await?;

    Ok(())
}
