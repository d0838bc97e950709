use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error type used at component seams (readers, writers, detectors, annotators).
///
/// `Send + Sync` so failures can cross pipeline worker threads with their
/// original cause attached.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure kinds surfaced by the annotation pipelines.
///
/// Only [`PipelineError::InvalidInput`] is caller-correctable; every other
/// kind is an environment or processing failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input {}: {source}", path.display())]
    InvalidInput {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("encoding failed for {}: {source}", path.display())]
    Encoding {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("annotation failed on frame {frame_index}: {source}")]
    Annotation {
        frame_index: usize,
        #[source]
        source: BoxError,
    },
    #[error("could not pad {} to {min_bytes} bytes: {reason}", path.display())]
    Padding {
        path: PathBuf,
        min_bytes: u64,
        reason: String,
    },
    #[error("processing cancelled after {frames_written} frames")]
    Cancelled { frames_written: usize },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pipeline worker failed: {0}")]
    Worker(String),
}

impl PipelineError {
    pub fn invalid_input(path: &Path, source: impl Into<BoxError>) -> Self {
        Self::InvalidInput {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    pub fn encoding(path: &Path, source: impl Into<BoxError>) -> Self {
        Self::Encoding {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the failure was caused by the submitted media rather than
    /// by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }
}
