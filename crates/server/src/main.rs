mod config;
mod error;
mod logging;
mod routes;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use clap::Parser;

use pcb_inspect_core::annotation::domain::frame_annotator::FrameAnnotator;
use pcb_inspect_core::annotation::infrastructure::detecting_annotator::DetectingAnnotator;
use pcb_inspect_core::detection::infrastructure::model_resolver;
use pcb_inspect_core::detection::infrastructure::onnx_yolo_detector::OnnxYoloDetector;
use pcb_inspect_core::shared::constants::YOLO_MODEL_NAME;
use pcb_inspect_core::shared::error::BoxError;
use pcb_inspect_core::video::infrastructure::ffmpeg_backend::FfmpegBackend;

use config::ServerConfig;
use state::AppState;

fn main() {
    dotenvy::dotenv().ok();
    let config = ServerConfig::parse();

    if let Err(e) = logging::init(config.log_file.as_deref()) {
        eprintln!("Error: cannot open log file: {e}");
        process::exit(1);
    }

    if let Err(e) = run(config) {
        log::error!("Server failed: {e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(config: ServerConfig) -> Result<(), BoxError> {
    config.validate()?;

    // The model may need a blocking download, so it is loaded before the
    // async runtime exists.
    let annotator = load_annotator(&config)?;
    let state = AppState {
        annotator,
        backend: Arc::new(FfmpegBackend),
        settings: config.pipeline_settings(),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config, state))
}

async fn serve(config: ServerConfig, state: AppState) -> Result<(), BoxError> {
    let prefix = config.api_prefix();
    let app = routes::router(state, &prefix, config.max_upload_bytes);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!(
        "PCB Defect Detection API listening on http://{} (prefix {prefix})",
        listener.local_addr()?
    );

    axum::serve(listener, app).await?;
    Ok(())
}

fn load_annotator(config: &ServerConfig) -> Result<Arc<dyn FrameAnnotator>, BoxError> {
    let model_path = model_resolver::resolve(
        config.model_path.as_deref(),
        YOLO_MODEL_NAME,
        config.model_url.as_deref(),
        None,
        Some(Box::new(|downloaded: u64, total: u64| {
            log::debug!("Downloading detection model: {downloaded}/{total} bytes");
        })),
    )?;

    let detector = OnnxYoloDetector::new(&model_path, config.confidence)?
        .with_class_names(config.class_names.clone());
    Ok(Arc::new(DetectingAnnotator::new(Arc::new(detector))))
}
