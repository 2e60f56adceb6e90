use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorConfig;
use crate::ingest::CameraConfig;
use crate::notify::TelegramConfig;
use crate::session::SessionConfig;
use crate::settings::{Settings, SettingsUpdate};

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CountwatchConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    display: Option<DisplayConfigFile>,
    api: Option<ApiConfigFile>,
    telegram: Option<TelegramConfigFile>,
    settings: Option<SettingsUpdate>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    host: Option<String>,
    port: Option<u16>,
    read_timeout_ms: Option<u64>,
    connect_retry_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    disconnect_threshold_secs: Option<u64>,
    max_buffer_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    classes: Option<Vec<u32>>,
    confidence: Option<f32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    sample_every: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TelegramConfigFile {
    bot_token: Option<String>,
    chat_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    /// Reports nothing; keeps the feed running without a model.
    Stub,
    /// ONNX model through tract (`backend-tract` feature).
    Tract,
}

impl DetectorKind {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!("unknown detector backend '{}' (expected stub or tract)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub config: DetectorConfig,
}

#[derive(Debug, Clone)]
pub struct CountwatchConfig {
    pub camera: CameraConfig,
    pub detector: DetectorSettings,
    pub session: SessionConfig,
    pub api_addr: String,
    /// `None` when no bot token/chat id is configured; events are then only
    /// logged.
    pub telegram: Option<TelegramConfig>,
    /// Initial notification policy.
    pub settings: Settings,
}

impl CountwatchConfig {
    /// Load from the file named by `COUNTWATCH_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("COUNTWATCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => CountwatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CountwatchConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let detector_file = file.detector.unwrap_or_default();
        let display_file = file.display.unwrap_or_default();

        let camera_defaults = CameraConfig::default();
        let camera = CameraConfig {
            host: camera_file.host.unwrap_or(camera_defaults.host),
            port: camera_file.port.unwrap_or(camera_defaults.port),
            read_timeout: camera_file
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(camera_defaults.read_timeout),
        };

        let detector_defaults = DetectorConfig::default();
        let detector = DetectorSettings {
            kind: match detector_file.backend.as_deref() {
                Some(raw) => DetectorKind::parse(raw)?,
                None => DetectorKind::Stub,
            },
            model_path: detector_file.model_path,
            config: DetectorConfig {
                classes: detector_file.classes.unwrap_or(detector_defaults.classes),
                confidence_threshold: detector_file
                    .confidence
                    .unwrap_or(detector_defaults.confidence_threshold),
                input_width: detector_file
                    .input_width
                    .unwrap_or(detector_defaults.input_width),
                input_height: detector_file
                    .input_height
                    .unwrap_or(detector_defaults.input_height),
            },
        };

        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            sample_every: detector_file
                .sample_every
                .unwrap_or(session_defaults.sample_every),
            connect_retry_delay: camera_file
                .connect_retry_ms
                .map(Duration::from_millis)
                .unwrap_or(session_defaults.connect_retry_delay),
            reconnect_delay: camera_file
                .reconnect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(session_defaults.reconnect_delay),
            disconnect_threshold: camera_file
                .disconnect_threshold_secs
                .map(Duration::from_secs)
                .unwrap_or(session_defaults.disconnect_threshold),
            max_buffer_bytes: camera_file
                .max_buffer_bytes
                .unwrap_or(session_defaults.max_buffer_bytes),
            display_width: display_file
                .width
                .unwrap_or(session_defaults.display_width),
            display_height: display_file
                .height
                .unwrap_or(session_defaults.display_height),
            ..session_defaults
        };

        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let telegram = match file.telegram {
            Some(TelegramConfigFile {
                bot_token: Some(bot_token),
                chat_id: Some(chat_id),
            }) => Some(TelegramConfig { bot_token, chat_id }),
            Some(TelegramConfigFile {
                bot_token: None,
                chat_id: None,
            })
            | None => None,
            Some(_) => {
                return Err(anyhow!(
                    "telegram config needs both bot_token and chat_id"
                ))
            }
        };

        let settings = match file.settings {
            Some(update) => Settings::default().merged(&update),
            None => Settings::default(),
        };

        Ok(Self {
            camera,
            detector,
            session,
            api_addr,
            telegram,
            settings,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(host) = non_empty_env("ESP_IP_ADDRESS") {
            self.camera.host = host;
        }
        if let Some(port) = non_empty_env("ESP_PORT") {
            self.camera.port = port
                .parse()
                .map_err(|_| anyhow!("ESP_PORT must be a port number, got '{}'", port))?;
        }
        if let Some(addr) = non_empty_env("COUNTWATCH_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(every) = non_empty_env("COUNTWATCH_SAMPLE_EVERY") {
            self.session.sample_every = every.parse().map_err(|_| {
                anyhow!("COUNTWATCH_SAMPLE_EVERY must be a positive integer, got '{}'", every)
            })?;
        }

        let token = non_empty_env("TELEGRAM_BOT_TOKEN");
        let chat_id = non_empty_env("TELEGRAM_CHAT_ID");
        match (token, chat_id) {
            (None, None) => {}
            (Some(bot_token), Some(chat_id)) => {
                self.telegram = Some(TelegramConfig { bot_token, chat_id });
            }
            (token, chat_id) => {
                // a single variable only patches a telegram section from the file
                let existing = self.telegram.as_mut().ok_or_else(|| {
                    anyhow!("TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set together")
                })?;
                if let Some(token) = token {
                    existing.bot_token = token;
                }
                if let Some(chat_id) = chat_id {
                    existing.chat_id = chat_id;
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.host.trim().is_empty() {
            return Err(anyhow!("camera host must not be empty"));
        }
        self.camera.url()?;
        if self.camera.read_timeout.is_zero() {
            return Err(anyhow!("camera read_timeout_ms must be greater than zero"));
        }
        self.detector.config.validate()?;
        if self.detector.kind == DetectorKind::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!("detector backend 'tract' requires model_path"));
        }
        self.session.validate()?;
        if self.session.display_width == 0 || self.session.display_height == 0 {
            return Err(anyhow!("display size must be non-zero"));
        }
        self.settings
            .validate()
            .context("invalid initial settings")?;
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<CountwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_kind_parse_is_case_insensitive() {
        assert_eq!(DetectorKind::parse("Stub").unwrap(), DetectorKind::Stub);
        assert_eq!(DetectorKind::parse(" tract ").unwrap(), DetectorKind::Tract);
        assert!(DetectorKind::parse("opencv").is_err());
    }

    #[test]
    fn partial_telegram_section_is_rejected() {
        let file: CountwatchConfigFile =
            serde_json::from_str(r#"{"telegram": {"bot_token": "t"}}"#).unwrap();
        assert!(CountwatchConfig::from_file(file).is_err());
    }
}
