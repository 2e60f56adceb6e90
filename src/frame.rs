//! Decoded frames, annotation and placeholder frames.
//!
//! - `DecodedFrame`: pixels plus the original JPEG bytes. The bytes are kept
//!   verbatim because notification snapshots send exactly what the camera
//!   produced.
//! - `annotate`: draws detection boxes onto a full-resolution frame.
//! - `status_frame`: black placeholder shown while no camera frames flow.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::Detection;

pub const DEFAULT_DISPLAY_WIDTH: u32 = 640;
pub const DEFAULT_DISPLAY_HEIGHT: u32 = 480;
pub const JPEG_QUALITY: u8 = 80;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;

/// One camera frame, decoded.
pub struct DecodedFrame {
    jpeg: Vec<u8>,
    image: RgbImage,
}

impl DecodedFrame {
    /// Decode an extracted JPEG slice.
    ///
    /// Empty or undecodable input is an error for this frame only; the caller
    /// drops it and moves on to the next one.
    pub fn decode(jpeg: Vec<u8>) -> Result<Self> {
        if jpeg.is_empty() {
            return Err(anyhow!("empty jpeg slice"));
        }
        let image = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .context("decode jpeg")?
            .into_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("jpeg decoded to an empty image"));
        }
        Ok(Self { jpeg, image })
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn into_parts(self) -> (Vec<u8>, RgbImage) {
        (self.jpeg, self.image)
    }
}

/// Draw `boxes` (already in `image` pixel space) as 2 px green rectangles.
///
/// Boxes are clamped to the image; degenerate boxes are skipped.
pub fn annotate(image: &mut RgbImage, boxes: &[Detection]) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    for det in boxes {
        let x1 = (det.x1 as i32).clamp(0, width - 1);
        let y1 = (det.y1 as i32).clamp(0, height - 1);
        let x2 = (det.x2 as i32).clamp(0, width - 1);
        let y2 = (det.y2 as i32).clamp(0, height - 1);
        for inset in 0..BOX_THICKNESS {
            let w = x2 - x1 - 2 * inset;
            let h = y2 - y1 - 2 * inset;
            if w < 1 || h < 1 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(out)
}

/// Status shown on placeholder frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Starting,
    Streaming,
    Disconnected,
}

impl FeedStatus {
    pub fn message(self) -> &'static str {
        match self {
            FeedStatus::Connecting => "Connecting to stream...",
            FeedStatus::Starting => "Starting Object Detection...",
            FeedStatus::Streaming => "Streaming",
            FeedStatus::Disconnected => "Camera Disconnected",
        }
    }

    fn indicator(self) -> Rgb<u8> {
        match self {
            FeedStatus::Connecting => Rgb([255, 200, 0]),
            FeedStatus::Starting | FeedStatus::Streaming => Rgb([0, 200, 0]),
            FeedStatus::Disconnected => Rgb([220, 0, 0]),
        }
    }
}

/// Black placeholder frame with a centred status indicator.
pub fn status_frame(width: u32, height: u32, status: FeedStatus) -> RgbImage {
    let mut image = RgbImage::new(width.max(1), height.max(1));
    let side = (image.width().min(image.height()) / 8).max(1);
    let x0 = (image.width() - side) / 2;
    let y0 = (image.height() - side) / 2;
    let color = status.indicator();
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            image.put_pixel(x, y, color);
        }
    }
    image
}
