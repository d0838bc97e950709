use std::sync::Arc;

use pcb_inspect_core::annotation::domain::frame_annotator::FrameAnnotator;
use pcb_inspect_core::pipeline::pipeline_settings::PipelineSettings;
use pcb_inspect_core::video::domain::video_backend::VideoBackend;

/// Shared by every request. The annotator (and the model inside it) is
/// loaded once at startup; each request builds its own pipeline around it.
#[derive(Clone)]
pub struct AppState {
    pub annotator: Arc<dyn FrameAnnotator>,
    pub backend: Arc<dyn VideoBackend>,
    pub settings: PipelineSettings,
}
