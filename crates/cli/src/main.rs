use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;

use pcb_inspect_core::annotation::domain::frame_annotator::FrameAnnotator;
use pcb_inspect_core::annotation::infrastructure::detecting_annotator::DetectingAnnotator;
use pcb_inspect_core::detection::infrastructure::model_resolver;
use pcb_inspect_core::detection::infrastructure::onnx_yolo_detector::OnnxYoloDetector;
use pcb_inspect_core::pipeline::annotate_image_use_case::AnnotateImageUseCase;
use pcb_inspect_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use pcb_inspect_core::pipeline::pipeline_settings::{AnnotationFailurePolicy, PipelineSettings};
use pcb_inspect_core::pipeline::transcode_video_use_case::TranscodeVideoUseCase;
use pcb_inspect_core::shared::constants::{
    DEFAULT_CONFIDENCE, IMAGE_EXTENSIONS, MAX_PADDING_FRAMES, MIN_OUTPUT_BYTES, YOLO_MODEL_NAME,
};
use pcb_inspect_core::shared::error::BoxError;
use pcb_inspect_core::video::infrastructure::ffmpeg_backend::FfmpegBackend;
use pcb_inspect_core::video::infrastructure::image_file_reader::ImageFileReader;
use pcb_inspect_core::video::infrastructure::jpeg_image_writer::JpegImageWriter;

/// PCB defect annotation for videos and images.
#[derive(Parser, Debug)]
#[command(name = "pcb-inspect")]
struct Cli {
    /// Input video or image file.
    input: PathBuf,

    /// Output file (MP4 for videos, JPEG for images).
    output: PathBuf,

    /// Path to the ONNX detection model.
    #[arg(long, env = "YOLO_MODEL_PATH")]
    model: Option<PathBuf>,

    /// URL to download the model from when it is not found locally.
    #[arg(long, env = "YOLO_MODEL_URL")]
    model_url: Option<String>,

    /// Detection confidence threshold (0.0-1.0).
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f64,

    /// Class labels in model output order (comma-separated).
    #[arg(long, value_delimiter = ',')]
    class_names: Option<Vec<String>>,

    /// Annotated videos smaller than this many bytes are padded with blank frames.
    #[arg(long, default_value_t = MIN_OUTPUT_BYTES)]
    min_output_bytes: u64,

    /// Upper bound on blank frames appended while padding.
    #[arg(long, default_value_t = MAX_PADDING_FRAMES)]
    max_padding_frames: usize,

    /// Annotation worker threads (1 = sequential).
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Write frames the detector fails on unannotated instead of aborting.
    #[arg(long)]
    pass_through_failures: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let settings = validate(&cli)?;

    let annotator = build_annotator(&cli)?;

    if is_image(&cli.input) {
        run_image(&cli.input, &cli.output, annotator)
    } else {
        run_video(&cli.input, &cli.output, annotator, &settings)
    }
}

fn run_image(
    input: &Path,
    output: &Path,
    annotator: Arc<dyn FrameAnnotator>,
) -> Result<(), BoxError> {
    let mut use_case = AnnotateImageUseCase::new(
        Box::new(ImageFileReader::new()),
        Box::new(JpegImageWriter::new()),
        annotator,
    );
    let image = use_case.execute(input)?;
    std::fs::write(output, &image.bytes)?;
    log::info!("Output written to {}", output.display());
    Ok(())
}

fn run_video(
    input: &Path,
    output: &Path,
    annotator: Arc<dyn FrameAnnotator>,
    settings: &PipelineSettings,
) -> Result<(), BoxError> {
    let mut use_case = TranscodeVideoUseCase::new(Arc::new(FfmpegBackend), annotator, settings)
        .with_logger(Box::new(StdoutPipelineLogger::default()))
        .with_progress(Arc::new(|current, total| {
            if total > 0 {
                eprint!("\rAnnotating frame {current}/{total}");
            } else {
                eprint!("\rAnnotating frame {current}");
            }
            true
        }));

    let result = use_case.transcode(input, output);
    eprintln!();
    result?;
    log::info!("Output written to {}", output.display());
    Ok(())
}

fn build_annotator(cli: &Cli) -> Result<Arc<dyn FrameAnnotator>, BoxError> {
    log::info!("Resolving model: {YOLO_MODEL_NAME}");
    let model_path = model_resolver::resolve(
        cli.model.as_deref(),
        YOLO_MODEL_NAME,
        cli.model_url.as_deref(),
        None,
        Some(Box::new(download_progress)),
    )?;

    let mut detector = OnnxYoloDetector::new(&model_path, cli.confidence)?;
    if let Some(names) = &cli.class_names {
        detector = detector.with_class_names(names.clone());
    }
    Ok(Arc::new(DetectingAnnotator::new(Arc::new(detector))))
}

fn validate(cli: &Cli) -> Result<PipelineSettings, BoxError> {
    if !cli.input.exists() {
        return Err(format!("Input file not found: {}", cli.input.display()).into());
    }
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }

    let settings = PipelineSettings {
        min_output_bytes: cli.min_output_bytes,
        max_padding_frames: cli.max_padding_frames,
        workers: cli.workers,
        failure_policy: if cli.pass_through_failures {
            AnnotationFailurePolicy::PassThrough
        } else {
            AnnotationFailurePolicy::Abort
        },
        ..PipelineSettings::default()
    };
    settings.validate()?;
    Ok(settings)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading detection model... {pct}%");
    } else {
        eprint!("\rDownloading detection model... {downloaded} bytes");
    }
}
