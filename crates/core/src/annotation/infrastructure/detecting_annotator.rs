use std::sync::Arc;

use crate::annotation::domain::frame_annotator::FrameAnnotator;
use crate::detection::domain::defect_detector::DefectDetector;
use crate::shared::error::BoxError;
use crate::shared::frame::Frame;

use super::box_renderer::BoxRenderer;

/// Runs a [`DefectDetector`] on each frame and draws its detections.
pub struct DetectingAnnotator {
    detector: Arc<dyn DefectDetector>,
    renderer: BoxRenderer,
}

impl DetectingAnnotator {
    pub fn new(detector: Arc<dyn DefectDetector>) -> Self {
        Self {
            detector,
            renderer: BoxRenderer::new(),
        }
    }
}

impl FrameAnnotator for DetectingAnnotator {
    fn annotate(&self, mut frame: Frame) -> Result<Frame, BoxError> {
        let detections = self.detector.detect(&frame)?;
        let names = self.detector.class_names();
        if log::log_enabled!(log::Level::Debug) && !detections.is_empty() {
            let labels: Vec<String> = detections
                .iter()
                .map(|d| BoxRenderer::label(d, names))
                .collect();
            log::debug!("Frame {}: {}", frame.index(), labels.join(", "));
        }
        self.renderer.render(&mut frame, &detections, names);
        Ok(frame)
    }
}
