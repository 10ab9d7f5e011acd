use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use attention_tracker::config::TrackerConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ATTENTION_CONFIG",
        "ATTENTION_API_ADDR",
        "ATTENTION_SOURCE",
        "ATTENTION_TARGET_FPS",
        "ATTENTION_ERROR_MARGIN",
        "ATTENTION_SYNC_INTERVAL_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_defaults_without_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TrackerConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert_eq!(cfg.source.locator, "stub://attentive");
    assert_eq!(cfg.source.target_fps, 30);
    assert_eq!(cfg.error_margin, 0.05);
    assert_eq!(cfg.sync_interval, Duration::from_secs(5));
    assert_eq!(cfg.source.max_read_failures, 20);
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": { "addr": "0.0.0.0:9000" },
        "source": {
            "locator": "recordings/session.jsonl",
            "target_fps": 15,
            "retry_backoff_ms": 250,
            "max_read_failures": 5
        },
        "classifier": { "error_margin": 0.02 },
        "sync": { "interval_secs": 10 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("ATTENTION_CONFIG", file.path());
    std::env::set_var("ATTENTION_SOURCE", "stub://pattern/AAD");
    std::env::set_var("ATTENTION_SYNC_INTERVAL_SECS", "2");

    let cfg = TrackerConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.source.locator, "stub://pattern/AAD");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.source.retry_backoff, Duration::from_millis(250));
    assert_eq!(cfg.source.max_read_failures, 5);
    assert_eq!(cfg.error_margin, 0.02);
    assert_eq!(cfg.sync_interval, Duration::from_secs(2));

    let monitor = cfg.monitor_config();
    assert_eq!(monitor.target_fps, 15);
    assert_eq!(monitor.sync_interval, Duration::from_secs(2));
    assert_eq!(cfg.api_config().addr, "0.0.0.0:9000");

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[api]
addr = "127.0.0.1:5050"

[source]
target_fps = 24

[classifier]
error_margin = 0.1
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("ATTENTION_CONFIG", file.path());
    std::env::set_var("ATTENTION_TARGET_FPS", "12");

    let cfg = TrackerConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:5050");
    assert_eq!(cfg.source.target_fps, 12);
    assert_eq!(cfg.error_margin, 0.1);
    assert_eq!(cfg.source.locator, "stub://attentive");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ATTENTION_ERROR_MARGIN", "0.5");
    let err = TrackerConfig::load().unwrap_err();
    assert!(err.to_string().contains("error_margin"), "{err}");
    clear_env();

    std::env::set_var("ATTENTION_TARGET_FPS", "fast");
    assert!(TrackerConfig::load().is_err());
    clear_env();

    std::env::set_var("ATTENTION_TARGET_FPS", "0");
    assert!(TrackerConfig::load().is_err());
    clear_env();

    std::env::set_var("ATTENTION_SYNC_INTERVAL_SECS", "0");
    assert!(TrackerConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_unknown_config_keys() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "api": { "adress": "127.0.0.1:1" } }"#)
        .expect("write config");
    std::env::set_var("ATTENTION_CONFIG", file.path());
    let err = TrackerConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"), "{err}");

    std::env::set_var("ATTENTION_CONFIG", "/definitely/missing/config.json");
    assert!(TrackerConfig::load().is_err());

    clear_env();
}
