use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::api::ApiConfig;
use crate::geometry::DEFAULT_ERROR_MARGIN;
use crate::monitor::MonitorConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_SOURCE: &str = "stub://attentive";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_MAX_READ_FAILURES: u32 = 20;

/// Above this the eye threshold `0.20 - margin` approaches zero and every
/// detected face reads as eyes-open.
pub const MAX_ERROR_MARGIN: f32 = 0.15;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackerConfigFile {
    api: Option<ApiConfigFile>,
    source: Option<SourceConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    sync: Option<SyncConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    locator: Option<String>,
    target_fps: Option<u32>,
    retry_backoff_ms: Option<u64>,
    max_read_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClassifierConfigFile {
    error_margin: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SyncConfigFile {
    interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub api_addr: String,
    pub source: SourceSettings,
    pub error_margin: f32,
    pub sync_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// `stub://<pattern>`, `-` for stdin, or a JSON-lines recording path.
    pub locator: String,
    pub target_fps: u32,
    pub retry_backoff: Duration,
    pub max_read_failures: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from_file(TrackerConfigFile::default())
    }
}

impl TrackerConfig {
    /// Defaults, then the file named by `ATTENTION_CONFIG`, then `ATTENTION_*`
    /// env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ATTENTION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let source = file.source.unwrap_or_default();
        let source = SourceSettings {
            locator: source.locator.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            retry_backoff: Duration::from_millis(
                source.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
            max_read_failures: source.max_read_failures.unwrap_or(DEFAULT_MAX_READ_FAILURES),
        };
        let error_margin = file
            .classifier
            .and_then(|classifier| classifier.error_margin)
            .unwrap_or(DEFAULT_ERROR_MARGIN);
        let sync_interval = Duration::from_secs(
            file.sync
                .and_then(|sync| sync.interval_secs)
                .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
        );
        Self {
            api_addr,
            source,
            error_margin,
            sync_interval,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("ATTENTION_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(locator) = std::env::var("ATTENTION_SOURCE") {
            if !locator.trim().is_empty() {
                self.source.locator = locator;
            }
        }
        if let Ok(fps) = std::env::var("ATTENTION_TARGET_FPS") {
            self.source.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("ATTENTION_TARGET_FPS must be a positive integer"))?;
        }
        if let Ok(margin) = std::env::var("ATTENTION_ERROR_MARGIN") {
            self.error_margin = margin
                .trim()
                .parse()
                .map_err(|_| anyhow!("ATTENTION_ERROR_MARGIN must be a number"))?;
        }
        if let Ok(interval) = std::env::var("ATTENTION_SYNC_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("ATTENTION_SYNC_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.sync_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.error_margin.is_finite() || !(0.0..=MAX_ERROR_MARGIN).contains(&self.error_margin) {
            return Err(anyhow!(
                "error_margin must be within 0.0..={}, got {}",
                MAX_ERROR_MARGIN,
                self.error_margin
            ));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("target_fps must be at least 1"));
        }
        if self.sync_interval < Duration::from_secs(1) {
            return Err(anyhow!("sync interval must be at least one second"));
        }
        if self.source.max_read_failures == 0 {
            return Err(anyhow!("max_read_failures must be at least 1"));
        }
        Ok(())
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            addr: self.api_addr.clone(),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            error_margin: self.error_margin,
            target_fps: self.source.target_fps,
            sync_interval: self.sync_interval,
            retry_backoff: self.source.retry_backoff,
            max_read_failures: self.source.max_read_failures,
            pace: true,
        }
    }
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
