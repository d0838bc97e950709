/// One detected defect: an axis-aligned box in source-frame pixel
/// coordinates, with its class and score.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub confidence: f64,
    pub class_id: usize,
}

impl Detection {
    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &Detection) -> f64 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }

    /// Clamps the box to `[0, width] x [0, height]`.
    pub fn clamped(&self, width: u32, height: u32) -> Detection {
        let w = width as f64;
        let h = height as f64;
        Detection {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
            ..self.clone()
        }
    }
}
