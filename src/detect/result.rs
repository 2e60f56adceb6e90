/// One detected object, in detection-input pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Model class index (0 = person for COCO-trained models).
    pub class: u32,
}

impl Detection {
    /// Map the box from one resolution to another.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
            ..*self
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Result of running detection on one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub boxes: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(boxes: Vec<Detection>) -> Self {
        Self { boxes }
    }

    /// Number of objects counted in the frame.
    pub fn count(&self) -> u32 {
        self.boxes.len() as u32
    }

    /// Boxes mapped from `from` (detection input size) to `to` (display size).
    pub fn scaled_boxes(&self, from: (u32, u32), to: (u32, u32)) -> Vec<Detection> {
        if from.0 == 0 || from.1 == 0 {
            return Vec::new();
        }
        let sx = to.0 as f32 / from.0 as f32;
        let sy = to.1 as f32 / from.1 as f32;
        self.boxes.iter().map(|b| b.scaled(sx, sy)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
            class: 0,
        }
    }

    #[test]
    fn boxes_scale_from_detection_input_to_display() {
        let result = DetectionResult::new(vec![det(0.0, 0.0, 416.0, 208.0)]);
        let scaled = result.scaled_boxes((416, 416), (640, 480));
        assert_eq!(scaled.len(), 1);
        assert_eq!(scaled[0].x2, 640.0);
        assert_eq!(scaled[0].y2, 240.0);
        assert_eq!(scaled[0].confidence, 0.9);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = det(0.0, 0.0, 10.0, 10.0);
        let b = det(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }
}
