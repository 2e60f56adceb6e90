//! ESP32 camera connection.
//!
//! The camera serves MJPEG over plain HTTP at `http://<host>:<port>/`. The
//! response body is consumed as an open-ended byte stream; framing is left
//! to `FrameExtractor`.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

/// Opens a fresh byte stream for each connection attempt.
///
/// The supervisor calls `connect` once per attempt and drops the reader on
/// disconnect. Implementations must bound individual reads (a stalled
/// camera has to surface as a read error eventually).
pub trait StreamConnector: Send {
    fn connect(&mut self) -> Result<Box<dyn Read + Send>>;

    /// Human-readable source for logs.
    fn describe(&self) -> String;
}

#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub host: String,
    pub port: u16,
    /// Per-read timeout. Connect attempts are not bounded here; the
    /// supervisor retries them forever.
    pub read_timeout: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 80,
            read_timeout: Duration::from_secs(5),
        }
    }
}

impl CameraConfig {
    pub fn url(&self) -> Result<Url> {
        let raw = format!("http://{}:{}/", self.host, self.port);
        Url::parse(&raw).with_context(|| format!("invalid camera address {}", raw))
    }
}

/// HTTP MJPEG camera.
pub struct HttpCamera {
    url: Url,
    agent: ureq::Agent,
}

impl HttpCamera {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let url = config.url()?;
        let agent = ureq::AgentBuilder::new()
            .timeout_read(config.read_timeout)
            .build();
        Ok(Self { url, agent })
    }
}

impl StreamConnector for HttpCamera {
    fn connect(&mut self) -> Result<Box<dyn Read + Send>> {
        let response = self
            .agent
            .get(self.url.as_str())
            .call()
            .with_context(|| format!("connect to camera stream {}", self.url))?;
        if response.status() != 200 {
            return Err(anyhow!(
                "camera stream {} answered with status {}",
                self.url,
                response.status()
            ));
        }
        Ok(Box::new(response.into_reader()))
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_url_uses_host_and_port() -> Result<()> {
        let cfg = CameraConfig {
            host: "192.168.4.1".to_string(),
            port: 81,
            ..CameraConfig::default()
        };
        assert_eq!(cfg.url()?.as_str(), "http://192.168.4.1:81/");
        Ok(())
    }

    #[test]
    fn camera_url_rejects_garbage_host() {
        let cfg = CameraConfig {
            host: "bad host/with spaces".to_string(),
            ..CameraConfig::default()
        };
        assert!(cfg.url().is_err());
    }
}
