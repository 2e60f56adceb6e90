use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::StatusCode;
use std::time::Duration;

use super::Notifier;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// Sends snapshots through the Bot API `sendPhoto` method.
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::blocking::Client,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("build telegram http client")?;
        Ok(Self {
            config,
            client,
            api_base: TELEGRAM_API.to_string(),
        })
    }

    /// Point at a different API host (local bot API server, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendPhoto",
            self.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send(&self, jpeg: &[u8], caption: &str) -> Result<()> {
        let photo = Part::bytes(jpeg.to_vec())
            .file_name("photo.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", caption.to_string())
            .part("photo", photo);
        let response = self
            .client
            .post(self.endpoint())
            .multipart(form)
            .send()
            .context("telegram sendPhoto transport error")?;
        if response.status() != StatusCode::OK {
            return Err(anyhow!(
                "telegram answered with status {}",
                response.status().as_u16()
            ));
        }
        Ok(())
    }
}
