//! attention_api - API-only service for the attention tracker
//!
//! This daemon:
//! 1. Holds the canonical session in memory
//! 2. Serves the stats API for a remote pusher (e.g. a browser-side classifier)
//! 3. Does NOT read landmark frames

use anyhow::Result;
use std::sync::mpsc;

use attention_tracker::{api::ApiServer, config::TrackerConfig, SharedSession};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = TrackerConfig::load()?;
    let session = SharedSession::new();
    let api_handle = ApiServer::new(config.api_config(), session).spawn()?;
    log::info!("stats api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("attention_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
