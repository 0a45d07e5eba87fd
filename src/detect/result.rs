/// Face location as fractions of the frame width/height.
///
/// Values are nominally in `[0, 1]`; detectors may report boxes that spill past
/// the frame edge, which `PixelRect::from_relative` clamps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelativeBox {
    pub x_min: f32,
    pub y_min: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence for this face.
    pub score: f32,
}

impl RelativeBox {
    pub fn new(x_min: f32, y_min: f32, width: f32, height: f32) -> Self {
        Self {
            x_min,
            y_min,
            width,
            height,
            score: 1.0,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Build from corner coordinates (x1, y1, x2, y2), all relative.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &RelativeBox) -> f32 {
        let ix1 = self.x_min.max(other.x_min);
        let iy1 = self.y_min.max(other.y_min);
        let ix2 = (self.x_min + self.width).min(other.x_min + other.width);
        let iy2 = (self.y_min + self.height).min(other.y_min + other.height);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}
