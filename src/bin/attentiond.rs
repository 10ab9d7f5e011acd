//! attentiond - attention tracker daemon
//!
//! This daemon:
//! 1. Serves the stats API (start/stop/sync/get)
//! 2. Reads landmark frames from the configured source
//! 3. Classifies each frame and aggregates session statistics locally
//! 4. Pushes the aggregate into the shared session every sync interval
//!
//! Stdin commands (unless stdin is the landmark source): `r` resets the
//! running session, `q` quits.

use anyhow::{anyhow, Result};
use std::io::BufRead;
use std::sync::mpsc;
use std::time::Duration;

use attention_tracker::{
    api::ApiServer, config::TrackerConfig, open_source, FrameMonitor, SharedSession,
};

enum Control {
    Shutdown,
    Reset,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = TrackerConfig::load()?;
    let session = SharedSession::new();

    let api_handle = ApiServer::new(config.api_config(), session.clone()).spawn()?;
    log::info!("stats api listening on {}", api_handle.addr);

    let source = open_source(&config.source.locator, config.source.target_fps)?;
    let monitor = FrameMonitor::new(config.monitor_config(), source, session.clone()).spawn()?;

    let (tx, rx) = mpsc::channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Control::Shutdown);
    })
    .expect("error setting Ctrl-C handler");

    if config.source.locator != "-" {
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let command = match line.trim() {
                    "r" | "reset" => Control::Reset,
                    "q" | "quit" => Control::Shutdown,
                    "" => continue,
                    other => {
                        log::warn!("unknown command '{}' (use r or q)", other);
                        continue;
                    }
                };
                if tx.send(command).is_err() {
                    break;
                }
            }
        });
    }

    log::info!(
        "attentiond running: source {} at {} fps, sync every {}s",
        config.source.locator,
        config.source.target_fps,
        config.sync_interval.as_secs()
    );

    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Control::Shutdown) => {
                log::info!("shutdown requested, stopping...");
                break;
            }
            Ok(Control::Reset) => monitor.request_reset(),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if monitor.is_finished() {
                    log::info!("frame monitor finished, stopping...");
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let monitor_result = monitor.stop();
    api_handle.stop()?;
    let stats = monitor_result.map_err(|err| anyhow!("frame monitor failed: {}", err))?;
    log::info!(
        "processed {} frames ({} classified, {} pushes)",
        stats.frames_read,
        stats.frames_classified,
        stats.pushes
    );
    Ok(())
}
