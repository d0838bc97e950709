use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::annotation::domain::frame_annotator::FrameAnnotator;
use crate::shared::error::PipelineError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_reader::VideoReader;
use crate::video::domain::video_writer::VideoWriter;

use super::pipeline_logger::PipelineLogger;
use super::pipeline_settings::AnnotationFailurePolicy;

/// Progress callback: `(frames_written, total_frames)`. Returning `false`
/// cancels the run. `total_frames` is 0 when the container doesn't say.
pub type ProgressFn = Arc<dyn Fn(usize, usize) -> bool + Send + Sync>;

/// Configuration for a pipeline execution run.
#[derive(Clone)]
pub struct PipelineConfig {
    pub failure_policy: AnnotationFailurePolicy,
    pub on_progress: Option<ProgressFn>,
    pub cancelled: Arc<AtomicBool>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            failure_policy: AnnotationFailurePolicy::Abort,
            on_progress: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl PipelineConfig {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Invokes the progress callback; `false` means the caller asked to stop.
    pub fn report_progress(&self, current: usize, total: usize) -> bool {
        match self.on_progress {
            Some(ref callback) => callback(current, total),
            None => true,
        }
    }
}

/// Abstracts how the read → annotate → write loop is executed.
///
/// This is a port (application-layer interface). Infrastructure provides
/// concrete implementations (sequential, threaded). Implementations open
/// `writer` at `output_path`, must write frames in source order, and must
/// close both `reader` and `writer` on every exit path.
pub trait PipelineExecutor: Send + Sync {
    /// Returns the number of frames written.
    #[allow(clippy::too_many_arguments)]
    fn execute(
        &self,
        reader: Box<dyn VideoReader>,
        writer: Box<dyn VideoWriter>,
        annotator: Arc<dyn FrameAnnotator>,
        metadata: &VideoMetadata,
        output_path: &Path,
        config: &PipelineConfig,
        logger: &mut dyn PipelineLogger,
    ) -> Result<usize, PipelineError>;
}

/// Annotates one frame, applying `policy` when the annotator fails.
///
/// The result always keeps the input's index; a frame that comes back with
/// a different layout counts as an annotation failure.
pub(crate) fn annotate_frame(
    annotator: &dyn FrameAnnotator,
    frame: Frame,
    policy: AnnotationFailurePolicy,
) -> Result<Frame, PipelineError> {
    let index = frame.index();
    let fallback = match policy {
        AnnotationFailurePolicy::PassThrough => Some(frame.clone()),
        AnnotationFailurePolicy::Abort => None,
    };
    let (width, height, channels) = (frame.width(), frame.height(), frame.channels());

    let failure = match annotator.annotate(frame) {
        Ok(annotated)
            if annotated.width() == width
                && annotated.height() == height
                && annotated.channels() == channels =>
        {
            return Ok(annotated.with_index(index));
        }
        Ok(annotated) => format!(
            "annotator changed frame layout from {width}x{height}x{channels} to {}x{}x{}",
            annotated.width(),
            annotated.height(),
            annotated.channels()
        )
        .into(),
        Err(e) => e,
    };

    match fallback {
        Some(original) => {
            log::warn!("Annotation failed on frame {index}, writing it unannotated: {failure}");
            Ok(original)
        }
        None => Err(PipelineError::Annotation {
            frame_index: index,
            source: failure,
        }),
    }
}
