/// File name the detection model is cached under when it has to be downloaded.
pub const YOLO_MODEL_NAME: &str = "pcb_defects_yolov8.onnx";

/// Default detection confidence threshold.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Class labels of the PCB defect dataset the bundled model is trained on,
/// in model output order.
pub const PCB_DEFECT_CLASSES: &[&str] = &[
    "missing_hole",
    "mouse_bite",
    "open_circuit",
    "short",
    "spur",
    "spurious_copper",
];

/// Annotated videos smaller than this are padded with blank frames (2 MiB).
pub const MIN_OUTPUT_BYTES: u64 = 2 * 1024 * 1024;

/// Upper bound on blank frames appended while padding one video.
pub const MAX_PADDING_FRAMES: usize = 100_000;

/// Consecutive zero-growth padding appends tolerated before giving up.
pub const MAX_STALLED_APPENDS: usize = 1_000;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

pub const VIDEO_MIME_TYPE: &str = "video/mp4";
pub const IMAGE_MIME_TYPE: &str = "image/jpeg";
