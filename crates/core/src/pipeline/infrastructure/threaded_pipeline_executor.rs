use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::annotation::domain::frame_annotator::FrameAnnotator;
use crate::pipeline::pipeline_executor::{annotate_frame, PipelineConfig, PipelineExecutor};
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::pipeline::pipeline_settings::AnnotationFailurePolicy;
use crate::shared::error::{BoxError, PipelineError};
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_reader::VideoReader;
use crate::video::domain::video_writer::VideoWriter;

const DEFAULT_CHANNEL_CAPACITY: usize = 8;

type Job = (usize, Result<Frame, BoxError>);
type Annotated = (usize, Result<Frame, PipelineError>, f64);

/// Executes the annotation pipeline with a pool of annotation workers.
///
/// Layout: `reader → N workers [annotate] → main [reorder] → writer`
///
/// Workers finish out of order; the main thread holds early frames until
/// their predecessors arrive, so the output is identical to the
/// sequential executor.
///
/// At most `max_in_flight` frames exist between the reader and the writer
/// at any time. The reader takes a credit per frame and the main thread
/// returns it once the frame is handed to the writer, so one stalled frame
/// cannot grow the reorder buffer past that window.
pub struct ThreadedPipelineExecutor {
    workers: usize,
    channel_capacity: usize,
    max_in_flight: Option<usize>,
}

impl ThreadedPipelineExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_in_flight: None,
        }
    }

    /// Caps decoded frames held between reader and writer.
    pub fn with_max_in_flight(mut self, frames: usize) -> Self {
        self.max_in_flight = Some(frames.max(1));
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Defaults to two frames per worker, and never below the channel capacity.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
            .unwrap_or_else(|| (2 * self.workers).max(self.channel_capacity))
    }
}

impl Default for ThreadedPipelineExecutor {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(workers)
    }
}

impl PipelineExecutor for ThreadedPipelineExecutor {
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

        let cap = self.channel_capacity.max(self.workers);
        // Internal stop signal so a failure on one thread winds down the
        // others without touching the caller's cancel token.
        let stop = Arc::new(AtomicBool::new(false));

        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(cap);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<Annotated>(cap);
        let (write_tx, write_rx) = crossbeam_channel::bounded::<Frame>(cap);

        let window = self.max_in_flight();
        let (credit_tx, credit_rx) = crossbeam_channel::bounded::<()>(window);
        for _ in 0..window {
            let _ = credit_tx.send(());
        }

        let reader_handle = spawn_reader(
            reader,
            job_tx,
            credit_rx,
            stop.clone(),
            config.cancelled.clone(),
        );
        let worker_handles: Vec<_> = (0..self.workers)
            .map(|_| {
                spawn_worker(
                    annotator.clone(),
                    job_rx.clone(),
                    done_tx.clone(),
                    stop.clone(),
                    config.failure_policy,
                    metadata.source_path_or_default(),
                )
            })
            .collect();
        drop(job_rx);
        drop(done_tx);
        let writer_handle = spawn_writer(writer, write_rx);

        let main_result = run_main_loop(
            done_rx,
            &write_tx,
            credit_tx,
            metadata.total_frames,
            config,
            logger,
        );
        if main_result.is_err() {
            stop.store(true, Ordering::Relaxed);
        }
        drop(write_tx);

        join_threads(
            reader_handle,
            worker_handles,
            writer_handle,
            output_path,
            main_result,
        )
    }
}

fn spawn_reader(
    mut reader: Box<dyn VideoReader>,
    job_tx: crossbeam_channel::Sender<Job>,
    credit_rx: crossbeam_channel::Receiver<()>,
    stop: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for (seq, frame_result) in reader.frames().enumerate() {
            if stop.load(Ordering::Relaxed) || cancelled.load(Ordering::Relaxed) {
                break;
            }
            // Disconnected once the main loop has returned.
            if credit_rx.recv().is_err() {
                break;
            }
            let failed = frame_result.is_err();
            if job_tx.send((seq, frame_result)).is_err() || failed {
                break;
            }
        }
        reader.close();
    })
}

fn spawn_worker(
    annotator: Arc<dyn FrameAnnotator>,
    job_rx: crossbeam_channel::Receiver<Job>,
    done_tx: crossbeam_channel::Sender<Annotated>,
    stop: Arc<AtomicBool>,
    policy: AnnotationFailurePolicy,
    source: std::path::PathBuf,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for (seq, frame_result) in job_rx {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let t0 = Instant::now();
            let result = match frame_result {
                Ok(frame) => annotate_frame(&*annotator, frame, policy),
                Err(e) => Err(PipelineError::invalid_input(&source, e)),
            };
            let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
            if done_tx.send((seq, result, elapsed_ms)).is_err() {
                break;
            }
        }
    })
}

fn spawn_writer(
    mut writer: Box<dyn VideoWriter>,
    write_rx: crossbeam_channel::Receiver<Frame>,
) -> JoinHandle<(Box<dyn VideoWriter>, Result<(), BoxError>)> {
    std::thread::spawn(move || {
        for frame in write_rx {
            if let Err(e) = writer.write(&frame) {
                return (writer, Err(e));
            }
        }
        (writer, Ok(()))
    })
}

/// Receives annotated frames, restores source order and forwards them to
/// the writer, returning one reader credit per forwarded frame. Returns the
/// number of frames handed to the writer.
fn run_main_loop(
    done_rx: crossbeam_channel::Receiver<Annotated>,
    write_tx: &crossbeam_channel::Sender<Frame>,
    credit_tx: crossbeam_channel::Sender<()>,
    total_frames: usize,
    config: &PipelineConfig,
    logger: &mut dyn PipelineLogger,
) -> Result<usize, PipelineError> {
    let mut pending: BTreeMap<usize, Result<Frame, PipelineError>> = BTreeMap::new();
    let mut next_seq = 0usize;
    let mut written = 0usize;

    for (seq, result, elapsed_ms) in done_rx {
        if config.is_cancelled() {
            return Err(PipelineError::Cancelled {
                frames_written: written,
            });
        }
        logger.timing("annotate", elapsed_ms);
        pending.insert(seq, result);
        logger.metric("reorder_buffer", pending.len() as f64);

        while let Some(result) = pending.remove(&next_seq) {
            let frame = result?;
            write_tx
                .send(frame)
                .map_err(|_| PipelineError::Worker("writer stopped accepting frames".into()))?;
            let _ = credit_tx.send(());
            next_seq += 1;
            written += 1;

            logger.progress(written, total_frames);
            if !config.report_progress(written, total_frames) {
                return Err(PipelineError::Cancelled {
                    frames_written: written,
                });
            }
        }
    }

    if config.is_cancelled() {
        return Err(PipelineError::Cancelled {
            frames_written: written,
        });
    }
    if let Some((&seq, _)) = pending.iter().next() {
        return Err(PipelineError::Worker(format!(
            "frame {next_seq} never arrived (next buffered frame is {seq})"
        )));
    }
    Ok(written)
}

/// Joins all pipeline threads, closes the writer and coalesces errors.
///
/// A failure reported by the writer thread wins over the main loop's
/// "writer stopped" error, since it carries the actual cause.
fn join_threads(
    reader_handle: JoinHandle<()>,
    worker_handles: Vec<JoinHandle<()>>,
    writer_handle: JoinHandle<(Box<dyn VideoWriter>, Result<(), BoxError>)>,
    output_path: &Path,
    mut result: Result<usize, PipelineError>,
) -> Result<usize, PipelineError> {
    fn keep_first(result: &mut Result<usize, PipelineError>, err: PipelineError) {
        if result.is_ok() {
            *result = Err(err);
        }
    }

    if reader_handle.join().is_err() {
        keep_first(&mut result, PipelineError::Worker("reader thread panicked".into()));
    }

    for handle in worker_handles {
        if handle.join().is_err() {
            keep_first(&mut result, PipelineError::Worker("annotation worker panicked".into()));
        }
    }

    match writer_handle.join() {
        Ok((mut writer, write_result)) => {
            let close_result = writer.close();
            if let Err(e) = write_result {
                let err = PipelineError::encoding(output_path, e);
                if matches!(result, Err(PipelineError::Worker(_))) {
                    result = Err(err);
                } else {
                    keep_first(&mut result, err);
                }
            }
            if let Err(e) = close_result {
                keep_first(&mut result, PipelineError::encoding(output_path, e));
            }
        }
        Err(_) => keep_first(&mut result, PipelineError::Worker("writer thread panicked".into())),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::infrastructure::sequential_pipeline_executor::SequentialPipelineExecutor;
    use crate::pipeline::pipeline_executor::test_support::*;
    use crate::pipeline::pipeline_logger::{NullPipelineLogger, StdoutPipelineLogger};
    use rstest::rstest;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sleeps longer on early frames so workers finish out of order.
    struct SlowStartAnnotator;

    impl FrameAnnotator for SlowStartAnnotator {
        fn annotate(&self, mut frame: Frame) -> Result<Frame, BoxError> {
            let delay = 20u64.saturating_sub(frame.index() as u64 * 2);
            std::thread::sleep(Duration::from_millis(delay));
            frame.data_mut()[1] = 200;
            Ok(frame)
        }
    }

    /// Holds frame 0 back long enough for every other frame to be annotated.
    struct StalledFirstFrameAnnotator;

    impl FrameAnnotator for StalledFirstFrameAnnotator {
        fn annotate(&self, frame: Frame) -> Result<Frame, BoxError> {
            if frame.index() == 0 {
                std::thread::sleep(Duration::from_millis(300));
            }
            Ok(frame)
        }
    }

    struct PanickingAnnotator;

    impl FrameAnnotator for PanickingAnnotator {
        fn annotate(&self, _frame: Frame) -> Result<Frame, BoxError> {
            panic!("annotator exploded");
        }
    }

    fn run(
        executor: &dyn PipelineExecutor,
        frames: Vec<Frame>,
        annotator: Arc<dyn FrameAnnotator>,
        config: &PipelineConfig,
    ) -> (Result<usize, PipelineError>, Arc<Mutex<Vec<Frame>>>, Arc<Mutex<bool>>) {
        let writer = StubWriter::default();
        let written = writer.written.clone();
        let closed = writer.closed.clone();
        let result = executor.execute(
            Box::new(StubReader::new(frames)),
            Box::new(writer),
            annotator,
            &metadata(4, 4, 0),
            Path::new("out.mp4"),
            config,
            &mut NullPipelineLogger,
        );
        (result, written, closed)
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    fn test_output_matches_sequential(#[case] workers: usize) {
        let config = PipelineConfig::default();
        let (seq_result, seq_written, _) = run(
            &SequentialPipelineExecutor::new(),
            numbered_frames(12, 4, 4),
            Arc::new(SlowStartAnnotator),
            &config,
        );
        let (par_result, par_written, closed) = run(
            &ThreadedPipelineExecutor::new(workers),
            numbered_frames(12, 4, 4),
            Arc::new(SlowStartAnnotator),
            &config,
        );

        assert_eq!(seq_result.unwrap(), 12);
        assert_eq!(par_result.unwrap(), 12);
        assert_eq!(*seq_written.lock().unwrap(), *par_written.lock().unwrap());
        assert!(*closed.lock().unwrap());
    }

    #[test]
    fn test_annotation_failure_reports_first_failing_frame() {
        let (result, written, closed) = run(
            &ThreadedPipelineExecutor::new(3),
            numbered_frames(10, 4, 4),
            Arc::new(RecordingAnnotator::failing_on(&[5, 7])),
            &PipelineConfig::default(),
        );

        assert!(matches!(
            result,
            Err(PipelineError::Annotation { frame_index: 5, .. })
        ));
        let indices: Vec<usize> = written.lock().unwrap().iter().map(|f| f.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(*closed.lock().unwrap());
    }

    #[test]
    fn test_pass_through_keeps_all_frames() {
        let config = PipelineConfig {
            failure_policy: AnnotationFailurePolicy::PassThrough,
            ..Default::default()
        };
        let (result, written, _) = run(
            &ThreadedPipelineExecutor::new(2),
            numbered_frames(8, 4, 4),
            Arc::new(RecordingAnnotator::failing_on(&[1])),
            &config,
        );

        assert_eq!(result.unwrap(), 8);
        assert_eq!(written.lock().unwrap()[1].data()[1], 0);
    }

    #[test]
    fn test_decode_error_is_invalid_input() {
        let mut results: Vec<Result<Frame, String>> =
            numbered_frames(3, 4, 4).into_iter().map(Ok).collect();
        results.push(Err("truncated".into()));

        let result = ThreadedPipelineExecutor::new(2).execute(
            Box::new(StubReader::with_results(results)),
            Box::new(StubWriter::default()),
            Arc::new(RecordingAnnotator::default()),
            &metadata(4, 4, 4),
            Path::new("out.mp4"),
            &PipelineConfig::default(),
            &mut NullPipelineLogger,
        );

        assert!(result.unwrap_err().is_client_error());
    }

    #[test]
    fn test_writer_failure_is_encoding_error() {
        let writer = StubWriter {
            fail_on_write: true,
            ..Default::default()
        };
        let result = ThreadedPipelineExecutor::new(2).execute(
            Box::new(StubReader::new(numbered_frames(30, 4, 4))),
            Box::new(writer),
            Arc::new(RecordingAnnotator::default()),
            &metadata(4, 4, 30),
            Path::new("out.mp4"),
            &PipelineConfig::default(),
            &mut NullPipelineLogger,
        );

        assert!(matches!(result, Err(PipelineError::Encoding { .. })));
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let (result, _, closed) = run(
            &ThreadedPipelineExecutor::new(2),
            numbered_frames(4, 4, 4),
            Arc::new(PanickingAnnotator),
            &PipelineConfig::default(),
        );

        assert!(matches!(result, Err(PipelineError::Worker(_))));
        assert!(*closed.lock().unwrap());
    }

    #[test]
    fn test_progress_callback_cancels() {
        let config = PipelineConfig {
            on_progress: Some(Arc::new(|current, _| current < 4)),
            ..Default::default()
        };
        let (result, _, closed) = run(
            &ThreadedPipelineExecutor::new(2),
            numbered_frames(20, 4, 4),
            Arc::new(RecordingAnnotator::default()),
            &config,
        );

        assert!(matches!(
            result,
            Err(PipelineError::Cancelled { frames_written: 4 })
        ));
        assert!(*closed.lock().unwrap());
    }

    #[test]
    fn test_stalled_frame_keeps_reorder_buffer_within_window() {
        let mut logger = StdoutPipelineLogger::new(1000);
        let writer = StubWriter::default();
        let written = writer.written.clone();
        let result = ThreadedPipelineExecutor::new(3)
            .with_max_in_flight(4)
            .execute(
                Box::new(StubReader::new(numbered_frames(40, 4, 4))),
                Box::new(writer),
                Arc::new(StalledFirstFrameAnnotator),
                &metadata(4, 4, 40),
                Path::new("out.mp4"),
                &PipelineConfig::default(),
                &mut logger,
            );

        assert_eq!(result.unwrap(), 40);
        let peak = logger.gauge("reorder_buffer").unwrap().max;
        assert!(peak <= 4.0, "reorder buffer peaked at {peak} frames");
        let indices: Vec<usize> = written.lock().unwrap().iter().map(|f| f.index()).collect();
        assert_eq!(indices, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_window_of_one_still_completes() {
        let (result, written, _) = run(
            &ThreadedPipelineExecutor::new(4).with_max_in_flight(0),
            numbered_frames(9, 4, 4),
            Arc::new(SlowStartAnnotator),
            &PipelineConfig::default(),
        );
        assert_eq!(result.unwrap(), 9);
        assert_eq!(written.lock().unwrap().len(), 9);
    }

    #[test]
    fn test_new_clamps_workers() {
        assert_eq!(ThreadedPipelineExecutor::new(0).workers(), 1);
    }

    #[test]
    fn test_default_window_scales_with_workers() {
        assert_eq!(
            ThreadedPipelineExecutor::new(2).max_in_flight(),
            DEFAULT_CHANNEL_CAPACITY
        );
        assert_eq!(ThreadedPipelineExecutor::new(16).max_in_flight(), 32);
        let capped = ThreadedPipelineExecutor::new(16).with_max_in_flight(5);
        assert_eq!(capped.max_in_flight(), 5);
    }
}
