use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::RgbImage;

use crate::detect::result::DetectionResult;

/// Detector backend trait.
///
/// A backend receives an RGB image already resized to the configured
/// detection input and returns boxes in that image's pixel space. Backends
/// may return every candidate they find; class filtering and the confidence
/// threshold are applied by `DetectionAdapter`.
///
/// `detect` is synchronous and sits on the supervisor's critical path, so
/// frame throughput is bounded by inference latency.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, image: &RgbImage) -> Result<DetectionResult>;

    /// Optional warm-up hook, called once before the first session.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Class indices that count (COCO: 0 = person, 2 = car).
    pub classes: Vec<u32>,
    pub confidence_threshold: f32,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            classes: vec![0],
            confidence_threshold: 0.5,
            input_width: 416,
            input_height: 416,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_width == 0 || self.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "detector confidence threshold must be within 0..=1, got {}",
                self.confidence_threshold
            ));
        }
        Ok(())
    }
}

/// The narrow contract the pipeline sees: frame in, filtered count + boxes out.
pub struct DetectionAdapter {
    backend: Box<dyn DetectorBackend>,
    config: DetectorConfig,
}

impl DetectionAdapter {
    pub fn new(backend: Box<dyn DetectorBackend>, config: DetectorConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Resolution boxes are reported in.
    pub fn input_size(&self) -> (u32, u32) {
        (self.config.input_width, self.config.input_height)
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    /// Resize `image` to the detection input, run the backend and keep only
    /// boxes of the configured classes at or above the threshold.
    pub fn detect(&mut self, image: &RgbImage) -> Result<DetectionResult> {
        let (w, h) = self.input_size();
        let result = if image.dimensions() == (w, h) {
            self.backend.detect(image)?
        } else {
            let resized = image::imageops::resize(image, w, h, FilterType::Triangle);
            self.backend.detect(&resized)?
        };
        let boxes = result
            .boxes
            .into_iter()
            .filter(|b| b.confidence >= self.config.confidence_threshold)
            .filter(|b| self.config.classes.is_empty() || self.config.classes.contains(&b.class))
            .collect();
        Ok(DetectionResult::new(boxes))
    }
}
