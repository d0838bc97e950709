use std::path::Path;
use std::sync::Arc;

use crate::annotation::domain::frame_annotator::FrameAnnotator;
use crate::shared::error::PipelineError;
use crate::video::domain::image_writer::ImageWriter;
use crate::video::domain::video_reader::VideoReader;

/// An encoded annotated image, ready to be returned to a client.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

/// Single-image annotation pipeline: read → annotate → encode.
pub struct AnnotateImageUseCase {
    reader: Box<dyn VideoReader>,
    image_writer: Box<dyn ImageWriter>,
    annotator: Arc<dyn FrameAnnotator>,
}

impl AnnotateImageUseCase {
    pub fn new(
        reader: Box<dyn VideoReader>,
        image_writer: Box<dyn ImageWriter>,
        annotator: Arc<dyn FrameAnnotator>,
    ) -> Self {
        Self {
            reader,
            image_writer,
            annotator,
        }
    }

    pub fn execute(&mut self, input_path: &Path) -> Result<AnnotatedImage, PipelineError> {
        let frame = self.read_first_frame(input_path);
        self.reader.close();
        let frame = frame?;

        let index = frame.index();
        let annotated = self
            .annotator
            .annotate(frame)
            .map_err(|source| PipelineError::Annotation {
                frame_index: index,
                source,
            })?;

        let bytes = self
            .image_writer
            .encode(&annotated)
            .map_err(|e| PipelineError::encoding(input_path, e))?;

        Ok(AnnotatedImage {
            bytes,
            mime_type: self.image_writer.mime_type(),
        })
    }

    fn read_first_frame(
        &mut self,
        input_path: &Path,
    ) -> Result<crate::shared::frame::Frame, PipelineError> {
        let invalid = |e| PipelineError::invalid_input(input_path, e);
        self.reader.open(input_path).map_err(invalid)?;
        match self.reader.frames().next() {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(invalid(e)),
            None => Err(PipelineError::invalid_input(input_path, "image has no frames")),
        }
    }
}
