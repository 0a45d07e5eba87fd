//! face_veil_web - face anonymization web service
//!
//! This daemon:
//! 1. Loads `ServiceConfig` (file named by FACE_VEIL_CONFIG + FACE_VEIL_* overrides)
//! 2. Serves the upload pages, processing endpoints and live MJPEG feeds
//! 3. Opens the camera lazily on the first feed request

use anyhow::{anyhow, Result};
use std::sync::mpsc;

use face_veil::api::{ApiServer, ServiceState};
use face_veil::config::ServiceConfig;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    log::info!(
        "face_veil_web {} (camera {}, detector {})",
        env!("CARGO_PKG_VERSION"),
        config.camera.device,
        config.detector.backend
    );
    let state = ServiceState::from_config(config)?;
    let handle = ApiServer::new(state).spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("face_veil_web serving on {}; waiting for shutdown signal (Ctrl-C)...", handle.addr);
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping web server...");
    handle.stop()?;

    Ok(())
}
