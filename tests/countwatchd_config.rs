use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use countwatch::config::{CountwatchConfig, DetectorKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "COUNTWATCH_CONFIG",
        "COUNTWATCH_API_ADDR",
        "COUNTWATCH_SAMPLE_EVERY",
        "ESP_IP_ADDRESS",
        "ESP_PORT",
        "TELEGRAM_BOT_TOKEN",
        "TELEGRAM_CHAT_ID",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CountwatchConfig::load().expect("load config");

    assert_eq!(cfg.camera.host, "127.0.0.1");
    assert_eq!(cfg.camera.port, 80);
    assert_eq!(cfg.camera.read_timeout, Duration::from_secs(5));
    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert_eq!(cfg.detector.kind, DetectorKind::Stub);
    assert_eq!(cfg.session.sample_every, 4);
    assert_eq!(cfg.session.disconnect_threshold, Duration::from_secs(10));
    assert!(cfg.telegram.is_none());
    assert!(cfg.settings.notify_enabled);
    assert_eq!(cfg.settings.settle_seconds, 3.0);
    assert_eq!(cfg.settings.min_count, 0);
    assert_eq!(cfg.settings.max_count, 100);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "camera": {
                "host": "192.168.4.1",
                "port": 8080,
                "read_timeout_ms": 2500,
                "reconnect_delay_ms": 500,
                "disconnect_threshold_secs": 20
            },
            "detector": {
                "backend": "stub",
                "classes": [0, 2],
                "confidence": 0.4,
                "sample_every": 2
            },
            "display": { "width": 320, "height": 240 },
            "api": { "addr": "127.0.0.1:8080" },
            "telegram": { "bot_token": "file-token", "chat_id": "111" },
            "settings": { "debounceThresh": 1.5, "maxCount": 5 }
        }"#,
    );

    std::env::set_var("COUNTWATCH_CONFIG", file.path());
    std::env::set_var("ESP_IP_ADDRESS", "10.0.0.7");
    std::env::set_var("COUNTWATCH_SAMPLE_EVERY", "3");
    std::env::set_var("TELEGRAM_CHAT_ID", "222");

    let cfg = CountwatchConfig::load().expect("load config");

    assert_eq!(cfg.camera.host, "10.0.0.7");
    assert_eq!(cfg.camera.port, 8080);
    assert_eq!(cfg.camera.read_timeout, Duration::from_millis(2500));
    assert_eq!(cfg.session.reconnect_delay, Duration::from_millis(500));
    assert_eq!(cfg.session.disconnect_threshold, Duration::from_secs(20));
    assert_eq!(cfg.session.sample_every, 3);
    assert_eq!(cfg.session.display_width, 320);
    assert_eq!(cfg.session.display_height, 240);
    assert_eq!(cfg.detector.config.classes, vec![0, 2]);
    assert_eq!(cfg.detector.config.confidence_threshold, 0.4);
    assert_eq!(cfg.api_addr, "127.0.0.1:8080");
    let telegram = cfg.telegram.expect("telegram config");
    assert_eq!(telegram.bot_token, "file-token");
    assert_eq!(telegram.chat_id, "222");
    assert_eq!(cfg.settings.settle_seconds, 1.5);
    assert_eq!(cfg.settings.max_count, 5);
    assert!(cfg.settings.notify_enabled);

    clear_env();
}

#[test]
fn telegram_from_env_alone() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TELEGRAM_BOT_TOKEN", "env-token");
    std::env::set_var("TELEGRAM_CHAT_ID", "42");
    let cfg = CountwatchConfig::load().expect("load config");
    let telegram = cfg.telegram.expect("telegram config");
    assert_eq!(telegram.bot_token, "env-token");
    assert_eq!(telegram.chat_id, "42");

    clear_env();
}

#[test]
fn rejects_partial_telegram_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TELEGRAM_BOT_TOKEN", "env-token");
    assert!(CountwatchConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_invalid_initial_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "settings": { "minCount": 9, "maxCount": 3 } }"#);
    std::env::set_var("COUNTWATCH_CONFIG", file.path());
    let err = CountwatchConfig::load().expect_err("min > max must fail");
    assert!(format!("{:#}", err).contains("minCount"));

    clear_env();
}

#[test]
fn rejects_tract_without_model_and_bad_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "detector": { "backend": "tract" } }"#);
    assert!(CountwatchConfig::load_from(Some(file.path())).is_err());

    let file = write_config(r#"{ "detector": { "backend": "yolo9000" } }"#);
    assert!(CountwatchConfig::load_from(Some(file.path())).is_err());

    std::env::set_var("COUNTWATCH_SAMPLE_EVERY", "0");
    assert!(CountwatchConfig::load_from(None).is_err());
    std::env::set_var("COUNTWATCH_SAMPLE_EVERY", "often");
    assert!(CountwatchConfig::load_from(None).is_err());
    std::env::remove_var("COUNTWATCH_SAMPLE_EVERY");

    std::env::set_var("ESP_PORT", "http");
    assert!(CountwatchConfig::load_from(None).is_err());

    clear_env();
}

#[test]
fn rejects_unknown_keys() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "camera": { "hostname": "oops" } }"#);
    assert!(CountwatchConfig::load_from(Some(file.path())).is_err());

    clear_env();
}

#[test]
fn rejects_zero_camera_read_timeout() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "camera": { "read_timeout_ms": 0 } }"#);
    let err = CountwatchConfig::load_from(Some(file.path())).expect_err("zero timeout must fail");
    assert!(format!("{:#}", err).contains("read_timeout_ms"));

    let file = write_config(r#"{ "camera": { "read_timeout_ms": 250 } }"#);
    let cfg = CountwatchConfig::load_from(Some(file.path())).unwrap();
    assert_eq!(cfg.camera.read_timeout, Duration::from_millis(250));

    clear_env();
}
