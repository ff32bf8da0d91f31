//! rtc-recorder - Main entry point
//!
//! Accepts browser WebRTC offers over HTTP and records the published video
//! track to WebM when the browser asks for it.

mod args;

use args::Args;
use clap::Parser;
use log::{error, info, warn};
use rtc_recorder::web::{self, AppState};
use rtc_recorder::{Config, TrackRegistry};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let (mut config, load_error) = match args.load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };
    args.apply(&mut config);

    // Initialize logging with noise filtering for third-party WebRTC crates
    env_logger::Builder::new()
        .parse_filters(&std::env::var("RECORDER_LOG").unwrap_or_else(|_| config.logging.level.clone()))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    info!("rtc-recorder v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!("Loaded configuration from {:?}", args.config),
        Some(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    info!("Recording to {:?}, at most {}s per session", config.recording.output_dir, config.recording.max_duration_secs);

    let registry = TrackRegistry::new();
    let state = Arc::new(AppState::new(config, registry));
    let session_manager = state.session_manager.clone();

    let shutdown = async {
        let _ = signal::ctrl_c().await;
        info!("Shutdown signal received");
    };

    let result = web::run_http_server(state, shutdown).await;

    info!("Closing {} active session(s)", session_manager.session_count().await);
    session_manager.close_all().await;

    if let Err(e) = result {
        error!("HTTP server error: {}", e);
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
