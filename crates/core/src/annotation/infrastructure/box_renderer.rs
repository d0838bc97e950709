use ab_glyph::{FontRef, PxScale};
use imageproc::drawing::{draw_text_mut, text_size, Canvas};

use crate::detection::domain::defect_detector::class_label;
use crate::shared::detection::Detection;
use crate::shared::frame::Frame;

/// Per-class outline colours, cycled for class ids beyond the palette.
const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
];

/// Outlines never get thinner than this, so boxes stay visible on small frames.
const MIN_THICKNESS: u32 = 2;

/// Label glyph height in multiples of the outline thickness, and its floor.
const LABEL_SCALE_FACTOR: u32 = 7;
const MIN_LABEL_PX: u32 = 14;

const LABEL_FONT: &[u8] = include_bytes!("../../../assets/DejaVuSansMono-Bold.ttf");

/// Draws detection boxes onto RGB frames.
///
/// Each box gets an outline in its class colour and a filled tab along its
/// top edge reading `"<class> <confidence>"`. The tab sits above the box,
/// or just inside it when the box touches the top of the frame.
#[derive(Clone)]
pub struct BoxRenderer {
    font: Option<FontRef<'static>>,
}

impl Default for BoxRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxRenderer {
    pub fn new() -> Self {
        let font = match FontRef::try_from_slice(LABEL_FONT) {
            Ok(font) => Some(font),
            Err(e) => {
                log::warn!("Label font unusable, drawing boxes without text: {e}");
                None
            }
        };
        Self { font }
    }

    pub fn color_for(class_id: usize) -> [u8; 3] {
        PALETTE[class_id % PALETTE.len()]
    }

    /// Outline thickness for a frame, scaling with its shorter side.
    pub fn thickness(width: u32, height: u32) -> u32 {
        (width.min(height) / 200).max(MIN_THICKNESS)
    }

    /// Label text colour: black on bright tabs, white on dark ones.
    pub fn text_color_for(tab: [u8; 3]) -> [u8; 3] {
        let luma = 0.299 * tab[0] as f64 + 0.587 * tab[1] as f64 + 0.114 * tab[2] as f64;
        if luma > 160.0 {
            [0, 0, 0]
        } else {
            [255, 255, 255]
        }
    }

    pub fn label(detection: &Detection, class_names: &[String]) -> String {
        format!(
            "{} {:.2}",
            class_label(class_names, detection.class_id),
            detection.confidence
        )
    }

    pub fn render(&self, frame: &mut Frame, detections: &[Detection], class_names: &[String]) {
        if frame.width() == 0 || frame.height() == 0 {
            return;
        }
        let t = Self::thickness(frame.width(), frame.height());
        let scale = PxScale::from((t * LABEL_SCALE_FACTOR).max(MIN_LABEL_PX) as f32);

        for det in detections {
            let d = det.clamped(frame.width(), frame.height());
            let color = Self::color_for(d.class_id);

            let x0 = d.x1.floor() as u32;
            let y0 = d.y1.floor() as u32;
            let x1 = d.x2.ceil() as u32;
            let y1 = d.y2.ceil() as u32;
            if x1 <= x0 || y1 <= y0 {
                continue;
            }

            fill_rect(frame, x0, y0, x1, y0 + t, color);
            fill_rect(frame, x0, y1.saturating_sub(t), x1, y1, color);
            fill_rect(frame, x0, y0, x0 + t, y1, color);
            fill_rect(frame, x1.saturating_sub(t), y0, x1, y1, color);

            let text = Self::label(&d, class_names);
            let (text_w, text_h) = match &self.font {
                Some(font) => text_size(scale, font, &text),
                None => (0, 0),
            };
            let tab_w = (text_w + 2 * t).max(x1 - x0);
            let tab_h = text_h.max(scale.y as u32) + t;
            let (tab_top, tab_bottom) = if y0 >= tab_h {
                (y0 - tab_h, y0)
            } else {
                (y0, y0 + tab_h)
            };
            fill_rect(frame, x0, tab_top, x0 + tab_w, tab_bottom, color);

            if let Some(font) = &self.font {
                let ink = image::Rgb(Self::text_color_for(color));
                let (x, y) = ((x0 + t) as i32, (tab_top + t / 2) as i32);
                let mut canvas = FrameCanvas(&mut *frame);
                draw_text_mut(&mut canvas, ink, x, y, scale, font, &text);
            }
        }
    }
}

/// Fills `[x0, x1) x [y0, y1)`, clipped to the frame.
fn fill_rect(frame: &mut Frame, x0: u32, y0: u32, x1: u32, y1: u32, color: [u8; 3]) {
    let x1 = x1.min(frame.width()) as usize;
    let y1 = y1.min(frame.height()) as usize;
    let x0 = x0 as usize;
    let y0 = y0 as usize;
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    let mut pixels = frame.as_ndarray_mut();
    for y in y0..y1 {
        for x in x0..x1 {
            for (c, value) in color.iter().enumerate() {
                pixels[[y, x, c]] = *value;
            }
        }
    }
}

type FramePixel = image::Rgb<u8>;

/// Lets imageproc draw straight into a frame's RGB buffer.
struct FrameCanvas<'a>(&'a mut Frame);

impl Canvas for FrameCanvas<'_> {
    type Pixel = FramePixel;

    fn dimensions(&self) -> (u32, u32) {
        (self.0.width(), self.0.height())
    }

    fn get_pixel(&self, x: u32, y: u32) -> FramePixel {
        let p = self.0.as_ndarray();
        let (x, y) = (x as usize, y as usize);
        image::Rgb([p[[y, x, 0]], p[[y, x, 1]], p[[y, x, 2]]])
    }

    fn draw_pixel(&mut self, x: u32, y: u32, color: FramePixel) {
        let mut p = self.0.as_ndarray_mut();
        let (x, y) = (x as usize, y as usize);
        for (c, value) in color.0.iter().enumerate() {
            p[[y, x, c]] = *value;
        }
    }
}
