use std::fmt;
use std::str::FromStr;

use crate::shared::constants::{MAX_PADDING_FRAMES, MAX_STALLED_APPENDS, MIN_OUTPUT_BYTES};

/// What to do when the annotator fails on a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnnotationFailurePolicy {
    /// Fail the whole transcode with the failing frame's index.
    #[default]
    Abort,
    /// Write the frame unannotated and log a warning.
    PassThrough,
}

impl FromStr for AnnotationFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "pass-through" | "passthrough" | "pass_through" => Ok(Self::PassThrough),
            other => Err(format!(
                "unknown annotation failure policy '{other}' (expected 'abort' or 'pass-through')"
            )),
        }
    }
}

impl fmt::Display for AnnotationFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => f.write_str("abort"),
            Self::PassThrough => f.write_str("pass-through"),
        }
    }
}

/// Tunables shared by every video annotation run.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    /// Outputs smaller than this are padded with blank frames.
    pub min_output_bytes: u64,
    pub max_padding_frames: usize,
    pub max_stalled_appends: usize,
    /// Annotation workers; `1` runs the sequential executor.
    pub workers: usize,
    pub failure_policy: AnnotationFailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_output_bytes: MIN_OUTPUT_BYTES,
            max_padding_frames: MAX_PADDING_FRAMES,
            max_stalled_appends: MAX_STALLED_APPENDS,
            workers: 1,
            failure_policy: AnnotationFailurePolicy::Abort,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".into());
        }
        if self.min_output_bytes > 0 && self.max_padding_frames == 0 {
            return Err("max_padding_frames must be positive when a minimum size is set".into());
        }
        if self.max_stalled_appends == 0 {
            return Err("max_stalled_appends must be at least 1".into());
        }
        Ok(())
    }
}
