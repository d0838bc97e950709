//! YOLOv8 defect detector using ONNX Runtime via `ort`.
//!
//! Handles letterbox preprocessing, inference and class-aware NMS.
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::defect_detector::DefectDetector;
use crate::shared::constants::PCB_DEFECT_CLASSES;
use crate::shared::detection::Detection;
use crate::shared::error::BoxError;
use crate::shared::frame::Frame;

use super::execution_provider::{accelerator_name, accelerators};

/// Fallback YOLO model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

/// Number of box coordinates preceding the class scores in each output row.
const BOX_VALUES: usize = 4;

/// YOLO defect detector backed by an ONNX Runtime session.
///
/// The session needs `&mut` to run, so it sits behind a mutex; everything
/// else is immutable after construction.
pub struct OnnxYoloDetector {
    session: Mutex<ort::session::Session>,
    class_names: Vec<String>,
    confidence: f64,
    input_size: u32,
}

impl OnnxYoloDetector {
    /// Load a YOLO ONNX model and prepare for inference.
    ///
    /// The input resolution is read from the model's input shape (expecting NCHW).
    /// Falls back to 640 if the shape is dynamic or unreadable.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, BoxError> {
        let session = ort::session::Session::builder()?
            .with_execution_providers(accelerators())?
            .commit_from_file(model_path)?;

        // Try to read input size from model metadata (NCHW: [1, 3, H, W])
        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as u32)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        log::info!(
            "Loaded detection model {} (input {input_size}px, confidence {confidence}, {})",
            model_path.display(),
            accelerator_name()
        );

        Ok(Self {
            session: Mutex::new(session),
            class_names: default_class_names(),
            confidence,
            input_size,
        })
    }

    /// Overrides the class labels, in model output order.
    pub fn with_class_names(mut self, names: Vec<String>) -> Self {
        if !names.is_empty() {
            self.class_names = names;
        }
        self
    }
}

pub fn default_class_names() -> Vec<String> {
    PCB_DEFECT_CLASSES.iter().map(|s| s.to_string()).collect()
}

impl DefectDetector for OnnxYoloDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, BoxError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let (input_tensor, geometry) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;

        let raw = parse_output(tensor.shape(), data, self.confidence, &geometry)?;
        let kept = nms(raw, NMS_IOU_THRESH);

        Ok(kept
            .into_iter()
            .map(|d| d.clamped(frame.width(), frame.height()))
            .filter(|d| d.area() > 0.0)
            .collect())
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// How a frame was fitted into the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct LetterboxGeometry {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl LetterboxGeometry {
    fn to_frame(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns the NCHW float32 tensor and the geometry needed to map boxes back.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, LetterboxGeometry) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Build padded image (filled with 114/255 gray, YOLO convention)
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray(); // [H, W, C] u8
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    // Nearest-neighbor resize + copy into padded region
    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        LetterboxGeometry {
            scale,
            pad_x,
            pad_y,
        },
    )
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

/// Decodes a YOLOv8 detection head.
///
/// The output is `[1, 4 + classes, anchors]` as exported by Ultralytics, or
/// `[1, anchors, 4 + classes]` for transposed exports. Each anchor carries
/// `cx, cy, w, h` in letterbox pixels followed by one score per class.
fn parse_output(
    shape: &[usize],
    data: &[f32],
    confidence: f64,
    geometry: &LetterboxGeometry,
) -> Result<Vec<Detection>, BoxError> {
    if shape.len() != 3 {
        return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if num_feats <= BOX_VALUES {
        return Err(format!("YOLO output has no class scores: {shape:?}").into());
    }
    if data.len() < num_dets * num_feats {
        return Err(format!(
            "YOLO output holds {} values, shape {shape:?} needs {}",
            data.len(),
            num_dets * num_feats
        )
        .into());
    }

    let value = |det: usize, feat: usize| -> f64 {
        if transposed {
            data[feat * num_dets + det] as f64
        } else {
            data[det * num_feats + feat] as f64
        }
    };

    let mut dets = Vec::new();
    for i in 0..num_dets {
        let (class_id, score) = (BOX_VALUES..num_feats)
            .map(|f| (f - BOX_VALUES, value(i, f)))
            .fold((0, f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < confidence {
            continue;
        }

        let cx = value(i, 0);
        let cy = value(i, 1);
        let w = value(i, 2);
        let h = value(i, 3);

        let (x1, y1) = geometry.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = geometry.to_frame(cx + w / 2.0, cy + h / 2.0);

        dets.push(Detection {
            x1,
            y1,
            x2,
            y2,
            confidence: score,
            class_id,
        });
    }
    Ok(dets)
}

/// Greedy class-aware NMS: sort by confidence descending, suppress
/// overlapping boxes of the same class.
fn nms(mut dets: Vec<Detection>, iou_thresh: f64) -> Vec<Detection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in dets {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == det.class_id && k.iou(&det) > iou_thresh);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
