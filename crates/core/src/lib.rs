//! PCB defect annotation for videos and still images.
//!
//! Frames flow reader → annotator → writer through a [`pipeline`] executor;
//! the annotator runs a YOLO-style ONNX [`detection`] model and draws the
//! detected defects onto each frame.

pub mod annotation;
pub mod detection;
pub mod pipeline;
pub mod shared;
pub mod video;
