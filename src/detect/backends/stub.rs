use std::collections::VecDeque;

use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};

/// Stub backend. Never detects anything; lets the daemon run without a model.
#[derive(Debug, Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<DetectionResult> {
        Ok(DetectionResult::default())
    }
}

/// Replays a fixed sequence of counts, one per call, then repeats the last.
///
/// Boxes are laid out as a row of equal tiles across the input so annotation
/// has something to draw.
#[derive(Debug)]
pub struct ScriptedBackend {
    counts: VecDeque<u32>,
    last: u32,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(counts: impl IntoIterator<Item = u32>) -> Self {
        Self {
            counts: counts.into_iter().collect(),
            last: 0,
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<DetectionResult> {
        self.calls += 1;
        if let Some(next) = self.counts.pop_front() {
            self.last = next;
        }
        let (width, height) = image.dimensions();
        let tile = width as f32 / self.last.max(1) as f32;
        let boxes = (0..self.last)
            .map(|i| Detection {
                x1: i as f32 * tile,
                y1: 0.0,
                x2: (i + 1) as f32 * tile - 1.0,
                y2: height as f32 - 1.0,
                confidence: 0.9,
                class: 0,
            })
            .collect();
        Ok(DetectionResult::new(boxes))
    }
}
