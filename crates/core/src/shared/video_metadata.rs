use std::path::PathBuf;

/// Frame rate used when a container reports none (still images, broken headers).
pub const FALLBACK_FPS: i32 = 30;

/// Largest time-base denominator the MPEG-4 Part 2 encoder accepts.
const MAX_TIME_BASE_DENOMINATOR: i32 = 65535;

/// A frame rate as an exact rational, e.g. `30000/1001` for NTSC video.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub num: i32,
    pub den: i32,
}

impl FrameRate {
    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn from_fps(fps: u32) -> Self {
        Self::new(fps as i32, 1)
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Returns a rate an encoder can use as-is.
    ///
    /// Unknown rates fall back to [`FALLBACK_FPS`]; rates whose denominator
    /// is too large for the encoder are rounded to whole frames per second.
    pub fn encodable(&self) -> FrameRate {
        if self.num <= 0 || self.den <= 0 {
            return FrameRate::new(FALLBACK_FPS, 1);
        }
        if self.den > MAX_TIME_BASE_DENOMINATOR {
            let rounded = self.as_f64().round() as i32;
            return FrameRate::new(rounded.max(1), 1);
        }
        *self
    }
}

/// Geometry and provenance of an opened video or image.
///
/// `width`, `height` and `frame_rate` are fixed for the lifetime of a
/// stream; outputs are always written with the geometry of their source.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub total_frames: usize,
    pub codec: String,
    pub source_path: Option<PathBuf>,
}

impl VideoMetadata {
    pub fn fps(&self) -> f64 {
        self.frame_rate.as_f64()
    }

    /// Source path for error reporting; empty when the reader had none.
    pub fn source_path_or_default(&self) -> PathBuf {
        self.source_path.clone().unwrap_or_default()
    }
}
