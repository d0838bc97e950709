use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::annotation::domain::frame_annotator::FrameAnnotator;
use crate::pipeline::pipeline_executor::{annotate_frame, PipelineConfig, PipelineExecutor};
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::error::PipelineError;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_reader::VideoReader;
use crate::video::domain::video_writer::VideoWriter;

/// Reads, annotates and writes one frame at a time on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialPipelineExecutor;

impl SequentialPipelineExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineExecutor for SequentialPipelineExecutor {
    fn execute(
        &self,
        mut reader: Box<dyn VideoReader>,
        mut writer: Box<dyn VideoWriter>,
        annotator: Arc<dyn FrameAnnotator>,
        metadata: &VideoMetadata,
        output_path: &Path,
        config: &PipelineConfig,
        logger: &mut dyn PipelineLogger,
    ) -> Result<usize, PipelineError> {
        if let Err(e) = writer.open(output_path, metadata) {
            reader.close();
            return Err(PipelineError::encoding(output_path, e));
        }

        let result = run_loop(
            &mut *reader,
            &mut *writer,
            &*annotator,
            metadata,
            output_path,
            config,
            logger,
        );

        reader.close();
        let closed = writer.close();

        let written = result?;
        closed.map_err(|e| PipelineError::encoding(output_path, e))?;
        Ok(written)
    }
}

fn run_loop(
    reader: &mut dyn VideoReader,
    writer: &mut dyn VideoWriter,
    annotator: &dyn FrameAnnotator,
    metadata: &VideoMetadata,
    output_path: &Path,
    config: &PipelineConfig,
    logger: &mut dyn PipelineLogger,
) -> Result<usize, PipelineError> {
    let source = metadata.source_path_or_default();
    let total = metadata.total_frames;
    let mut written = 0usize;

    for frame_result in reader.frames() {
        if config.is_cancelled() {
            return Err(PipelineError::Cancelled {
                frames_written: written,
            });
        }

        let frame = frame_result.map_err(|e| PipelineError::invalid_input(&source, e))?;

        let t0 = Instant::now();
        let annotated = annotate_frame(annotator, frame, config.failure_policy)?;
        logger.timing("annotate", t0.elapsed().as_secs_f64() * 1000.0);

        let t0 = Instant::now();
        writer
            .write(&annotated)
            .map_err(|e| PipelineError::encoding(output_path, e))?;
        logger.timing("write", t0.elapsed().as_secs_f64() * 1000.0);

        written += 1;
        logger.progress(written, total);
        if !config.report_progress(written, total) {
            return Err(PipelineError::Cancelled {
                frames_written: written,
            });
        }
    }

    Ok(written)
}
