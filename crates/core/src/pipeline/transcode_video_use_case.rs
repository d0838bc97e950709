use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use crate::annotation::domain::frame_annotator::FrameAnnotator;
use crate::shared::error::PipelineError;
use crate::video::domain::video_backend::VideoBackend;

use super::infrastructure::sequential_pipeline_executor::SequentialPipelineExecutor;
use super::infrastructure::threaded_pipeline_executor::ThreadedPipelineExecutor;
use super::minimum_size_policy::{parent_dir, MinimumSizePolicy, PaddingOutcome};
use super::pipeline_executor::{PipelineConfig, PipelineExecutor, ProgressFn};
use super::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use super::pipeline_settings::{AnnotationFailurePolicy, PipelineSettings};

/// Annotates every frame of a video into a new MP4 at a destination path.
///
/// Output is staged in a temporary file next to the destination and only
/// renamed into place once annotation and padding have both succeeded, so a
/// file at the destination is always complete.
pub struct TranscodeVideoUseCase {
    backend: Arc<dyn VideoBackend>,
    annotator: Arc<dyn FrameAnnotator>,
    executor: Box<dyn PipelineExecutor>,
    padding: MinimumSizePolicy,
    min_output_bytes: u64,
    failure_policy: AnnotationFailurePolicy,
    on_progress: Option<ProgressFn>,
    cancelled: Arc<AtomicBool>,
    logger: Box<dyn PipelineLogger>,
}

impl TranscodeVideoUseCase {
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        annotator: Arc<dyn FrameAnnotator>,
        settings: &PipelineSettings,
    ) -> Self {
        let executor: Box<dyn PipelineExecutor> = if settings.workers > 1 {
            Box::new(ThreadedPipelineExecutor::new(settings.workers))
        } else {
            Box::new(SequentialPipelineExecutor::new())
        };
        let padding = MinimumSizePolicy::new(backend.clone())
            .with_limits(settings.max_padding_frames, settings.max_stalled_appends);

        Self {
            backend,
            annotator,
            executor,
            padding,
            min_output_bytes: settings.min_output_bytes,
            failure_policy: settings.failure_policy,
            on_progress: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            logger: Box::new(NullPipelineLogger),
        }
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn with_cancel_token(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Annotates `source` into `dest` and returns `dest`.
    ///
    /// The source is never modified. On failure nothing is left at `dest`
    /// (a pre-existing file there is not touched either).
    pub fn transcode(&mut self, source: &Path, dest: &Path) -> Result<PathBuf, PipelineError> {
        let started = Instant::now();

        let mut reader = self.backend.reader();
        let metadata = match reader.open(source) {
            Ok(metadata) => metadata,
            Err(e) => {
                reader.close();
                return Err(PipelineError::invalid_input(source, e));
            }
        };
        if metadata.width == 0 || metadata.height == 0 {
            reader.close();
            return Err(PipelineError::invalid_input(
                source,
                format!(
                    "video has no picture ({}x{})",
                    metadata.width, metadata.height
                ),
            ));
        }

        let dir = parent_dir(dest);
        let staged = match tempfile::Builder::new()
            .prefix(".pcb-inspect-")
            .suffix(".mp4")
            .tempfile_in(dir)
        {
            Ok(file) => file.into_temp_path(),
            Err(e) => {
                reader.close();
                return Err(PipelineError::io(
                    format!("cannot stage output in {}", dir.display()),
                    e,
                ));
            }
        };

        self.logger.info(&format!(
            "Annotating {} ({}x{} @ {:.2} fps)",
            source.display(),
            metadata.width,
            metadata.height,
            metadata.fps()
        ));

        let config = PipelineConfig {
            failure_policy: self.failure_policy,
            on_progress: self.on_progress.clone(),
            cancelled: self.cancelled.clone(),
        };
        let frames = self.executor.execute(
            reader,
            self.backend.writer(),
            self.annotator.clone(),
            &metadata,
            &staged,
            &config,
            self.logger.as_mut(),
        )?;
        self.logger.summary();

        match self
            .padding
            .ensure_minimum_size(&staged, &metadata, self.min_output_bytes)?
        {
            PaddingOutcome::Unchanged => {}
            PaddingOutcome::Padded { blank_frames, .. } => self
                .logger
                .info(&format!("Appended {blank_frames} blank frames to reach minimum size")),
        }

        staged.persist(dest).map_err(|e| {
            PipelineError::io(format!("cannot move output to {}", dest.display()), e.error)
        })?;

        log::info!(
            "Wrote {} ({frames} frames) in {:.1}s",
            dest.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipeline_executor::test_support::*;
    use crate::shared::frame::Frame;
    use crate::video::domain::video_reader::VideoReader;
    use crate::video::infrastructure::ffmpeg_backend::FfmpegBackend;
    use crate::video::infrastructure::ffmpeg_reader::FfmpegReader;
    use crate::video::infrastructure::test_video::create_test_video;
    use std::fs;
    use std::sync::atomic::Ordering;

    const W: u32 = 4;
    const H: u32 = 4;
    const FRAME_BYTES: u64 = (W * H * 3) as u64;

    fn settings(min_output_bytes: u64) -> PipelineSettings {
        PipelineSettings {
            min_output_bytes,
            ..Default::default()
        }
    }

    fn raw_use_case(annotator: Arc<RecordingAnnotator>, min_bytes: u64) -> TranscodeVideoUseCase {
        TranscodeVideoUseCase::new(
            Arc::new(RawFileBackend::new(W, H)),
            annotator,
            &settings(min_bytes),
        )
    }

    fn read_raw(path: &Path) -> Vec<Frame> {
        let mut reader = RawFileReader::new(W, H);
        reader.open(path).unwrap();
        reader.frames().map(|f| f.unwrap()).collect()
    }

    #[test]
    fn test_every_frame_annotated_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.raw");
        let dest = dir.path().join("out.mp4");
        write_raw_video(&source, 10, W, H);
        let annotator = Arc::new(RecordingAnnotator::default());

        let out = raw_use_case(annotator.clone(), 0)
            .transcode(&source, &dest)
            .unwrap();

        assert_eq!(out, dest);
        assert_eq!(annotator.call_count(), 10);
        let frames = read_raw(&dest);
        assert_eq!(frames.len(), 10);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.data()[0], i as u8, "frame {i} out of order");
            assert_eq!(frame.data()[1], 255, "frame {i} not annotated");
        }
        assert!(source.exists(), "source must be kept");
    }

    #[test]
    fn test_small_output_is_padded_after_original_frames() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.raw");
        let dest = dir.path().join("out.mp4");
        write_raw_video(&source, 3, W, H);

        raw_use_case(Arc::new(RecordingAnnotator::default()), 8 * FRAME_BYTES)
            .transcode(&source, &dest)
            .unwrap();

        assert!(fs::metadata(&dest).unwrap().len() >= 8 * FRAME_BYTES);
        let frames = read_raw(&dest);
        assert_eq!(frames.len(), 8);
        assert_eq!(frames[2].data()[0], 2);
        assert_eq!(frames[2].data()[1], 255);
        assert!(frames[3].data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_undecodable_source_is_invalid_input_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.raw");
        fs::write(&source, b"not a video").unwrap();
        let dest = dir.path().join("out.mp4");

        let err = raw_use_case(Arc::new(RecordingAnnotator::default()), 0)
            .transcode(&source, &dest)
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidInput { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_annotation_failure_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.raw");
        let dest = dir.path().join("out.mp4");
        write_raw_video(&source, 10, W, H);

        let err = raw_use_case(Arc::new(RecordingAnnotator::failing_on(&[5])), 0)
            .transcode(&source, &dest)
            .unwrap_err();

        assert!(matches!(err, PipelineError::Annotation { frame_index: 5, .. }));
        assert!(!dest.exists());
        // Only the source remains; the staged file was cleaned up.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_cancel_token_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.raw");
        let dest = dir.path().join("out.mp4");
        write_raw_video(&source, 5, W, H);
        let cancelled = Arc::new(AtomicBool::new(true));

        let err = raw_use_case(Arc::new(RecordingAnnotator::default()), 0)
            .with_cancel_token(cancelled.clone())
            .transcode(&source, &dest)
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled { frames_written: 0 }));
        assert!(cancelled.load(Ordering::Relaxed));
        assert!(!dest.exists());
    }

    #[test]
    fn test_threaded_settings_produce_same_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.raw");
        write_raw_video(&source, 12, W, H);

        let seq_dest = dir.path().join("seq.mp4");
        raw_use_case(Arc::new(RecordingAnnotator::default()), 0)
            .transcode(&source, &seq_dest)
            .unwrap();

        let par_dest = dir.path().join("par.mp4");
        let threaded = PipelineSettings {
            workers: 3,
            min_output_bytes: 0,
            ..Default::default()
        };
        TranscodeVideoUseCase::new(
            Arc::new(RawFileBackend::new(W, H)),
            Arc::new(RecordingAnnotator::default()),
            &threaded,
        )
        .transcode(&source, &par_dest)
        .unwrap();

        assert_eq!(fs::read(&seq_dest).unwrap(), fs::read(&par_dest).unwrap());
    }

    #[test]
    fn test_progress_reports_each_frame() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.raw");
        write_raw_video(&source, 4, W, H);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();

        raw_use_case(Arc::new(RecordingAnnotator::default()), 0)
            .with_progress(Arc::new(move |current, total| {
                sink.lock().unwrap().push((current, total));
                true
            }))
            .transcode(&source, &dir.path().join("out.mp4"))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
    }

    #[test]
    fn test_ffmpeg_transcode_preserves_geometry_and_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mp4");
        let dest = dir.path().join("out.mp4");
        create_test_video(&source, 10, 640, 480, 30);
        let annotator = Arc::new(RecordingAnnotator::default());

        TranscodeVideoUseCase::new(Arc::new(FfmpegBackend), annotator.clone(), &settings(0))
            .transcode(&source, &dest)
            .unwrap();

        assert_eq!(annotator.call_count(), 10);
        let mut reader = FfmpegReader::new();
        let meta = reader.open(&dest).unwrap();
        assert_eq!((meta.width, meta.height), (640, 480));
        assert!((meta.fps() - 30.0).abs() < 0.5);
        assert_eq!(reader.frames().filter(|f| f.is_ok()).count(), 10);
    }

    #[test]
    fn test_ffmpeg_garbage_source_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mp4");
        fs::write(&source, vec![0x42u8; 4096]).unwrap();
        let dest = dir.path().join("out.mp4");

        let err = TranscodeVideoUseCase::new(
            Arc::new(FfmpegBackend),
            Arc::new(RecordingAnnotator::default()),
            &settings(0),
        )
        .transcode(&source, &dest)
        .unwrap_err();

        assert!(err.is_client_error());
        assert!(!dest.exists());
    }
}
