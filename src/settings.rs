//! Live notification policy.
//!
//! `LiveSettings` holds an immutable `Settings` snapshot behind an `Arc`.
//! Updates clone the current snapshot, merge the provided fields, validate
//! the result and swap it in. Readers take the `Arc` once and evaluate
//! against that, so a concurrent update can never mix an old `min_count`
//! with a new `max_count`.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Policy snapshot. Field names on the wire match the settings page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "telegramNotif")]
    pub notify_enabled: bool,
    /// Settle time in seconds.
    #[serde(rename = "debounceThresh")]
    pub settle_seconds: f64,
    #[serde(rename = "minCount")]
    pub min_count: u32,
    #[serde(rename = "maxCount")]
    pub max_count: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notify_enabled: true,
            settle_seconds: 3.0,
            min_count: 0,
            max_count: 100,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !self.settle_seconds.is_finite() || self.settle_seconds < 0.0 {
            return Err(anyhow!(
                "debounceThresh must be a non-negative number of seconds, got {}",
                self.settle_seconds
            ));
        }
        if self.min_count > self.max_count {
            return Err(anyhow!(
                "minCount ({}) must not exceed maxCount ({})",
                self.min_count,
                self.max_count
            ));
        }
        Ok(())
    }

    /// Apply the provided fields of `update` on top of `self`.
    pub fn merged(&self, update: &SettingsUpdate) -> Settings {
        Settings {
            notify_enabled: update.notify_enabled.unwrap_or(self.notify_enabled),
            settle_seconds: update.settle_seconds.unwrap_or(self.settle_seconds),
            min_count: update.min_count.unwrap_or(self.min_count),
            max_count: update.max_count.unwrap_or(self.max_count),
        }
    }
}

/// Partial update; absent keys leave the current value alone.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    #[serde(rename = "telegramNotif")]
    pub notify_enabled: Option<bool>,
    #[serde(rename = "debounceThresh")]
    pub settle_seconds: Option<f64>,
    #[serde(rename = "minCount")]
    pub min_count: Option<u32>,
    #[serde(rename = "maxCount")]
    pub max_count: Option<u32>,
}

impl SettingsUpdate {
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| anyhow!("invalid settings payload: {}", e))
    }
}

#[derive(Debug)]
pub struct LiveSettings {
    current: RwLock<Arc<Settings>>,
}

impl LiveSettings {
    pub fn new(initial: Settings) -> Result<Self> {
        initial.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(initial)),
        })
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<Settings> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Merge `update` into the current snapshot and publish it.
    ///
    /// The write lock is held across read-merge-swap so two concurrent
    /// partial updates cannot lose each other's fields. An invalid result is
    /// rejected and the previous snapshot stays in place.
    pub fn update(&self, update: &SettingsUpdate) -> Result<Arc<Settings>> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        let merged = guard.merged(update);
        merged.validate()?;
        let merged = Arc::new(merged);
        *guard = merged.clone();
        log::info!(
            "settings updated: notify={} settle={}s range=[{}, {}]",
            merged.notify_enabled,
            merged.settle_seconds,
            merged.min_count,
            merged.max_count
        );
        Ok(merged)
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(Settings::default())),
        }
    }
}
