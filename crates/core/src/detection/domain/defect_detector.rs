use std::borrow::Cow;

use crate::shared::detection::Detection;
use crate::shared::error::BoxError;
use crate::shared::frame::Frame;

/// Domain interface for defect detection.
///
/// Implementations are shared between concurrent pipelines, so `detect`
/// takes `&self`; any mutable inference state must be synchronized inside.
pub trait DefectDetector: Send + Sync {
    /// Detections in frame pixel coordinates, clamped to the frame.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, BoxError>;

    /// Human-readable class labels, indexed by `Detection::class_id`.
    fn class_names(&self) -> &[String];
}

/// Label for `class_id`, falling back to `class_<id>` for ids the
/// detector has no name for.
pub fn class_label(names: &[String], class_id: usize) -> Cow<'_, str> {
    match names.get(class_id) {
        Some(name) => Cow::Borrowed(name.as_str()),
        None => Cow::Owned(format!("class_{class_id}")),
    }
}
