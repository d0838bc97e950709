use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use pcb_inspect_core::pipeline::pipeline_settings::{AnnotationFailurePolicy, PipelineSettings};
use pcb_inspect_core::shared::constants::{DEFAULT_CONFIDENCE, MAX_PADDING_FRAMES, MIN_OUTPUT_BYTES};

/// Uploads larger than this are rejected with 413 (512 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Server settings, read from flags or the environment (a `.env` file is
/// loaded first).
#[derive(Parser, Debug, Clone)]
#[command(name = "pcb-inspect-server", version, about = "PCB defect detection API")]
pub struct ServerConfig {
    /// Path prefix in front of `/api/v1`.
    #[arg(long, env = "BASE_PATH", default_value = "/pcb")]
    pub base_path: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8004)]
    pub port: u16,

    #[arg(long, env = "YOLO_MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Where to download the model from when no local copy exists.
    #[arg(long, env = "YOLO_MODEL_URL")]
    pub model_url: Option<String>,

    #[arg(long, env = "CONF_THRESHOLD", default_value_t = DEFAULT_CONFIDENCE)]
    pub confidence: f64,

    /// Class labels in model output order.
    #[arg(long, env = "CLASS_NAMES", value_delimiter = ',')]
    pub class_names: Vec<String>,

    #[arg(long, env = "MIN_OUTPUT_BYTES", default_value_t = MIN_OUTPUT_BYTES)]
    pub min_output_bytes: u64,

    #[arg(long, env = "MAX_PADDING_FRAMES", default_value_t = MAX_PADDING_FRAMES)]
    pub max_padding_frames: usize,

    /// Annotation threads per video request (1 = sequential).
    #[arg(long, env = "WORKERS", default_value_t = 1)]
    pub workers: usize,

    #[arg(long, env = "ANNOTATION_FAILURE_POLICY", default_value_t = AnnotationFailurePolicy::Abort)]
    pub failure_policy: AnnotationFailurePolicy,

    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Also append log output to this file.
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl ServerConfig {
    /// `{base_path}/api/v1`, with stray slashes normalised.
    pub fn api_prefix(&self) -> String {
        let base = self.base_path.trim_matches('/');
        if base.is_empty() {
            "/api/v1".to_string()
        } else {
            format!("/{base}/api/v1")
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            min_output_bytes: self.min_output_bytes,
            max_padding_frames: self.max_padding_frames,
            workers: self.workers,
            failure_policy: self.failure_policy,
            ..PipelineSettings::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "CONF_THRESHOLD must be between 0.0 and 1.0, got {}",
                self.confidence
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err("MAX_UPLOAD_BYTES must be positive".into());
        }
        self.pipeline_settings().validate()
    }
}
