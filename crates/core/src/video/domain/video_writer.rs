use std::path::Path;

use crate::shared::error::BoxError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// Abstracts video encoding so the pipeline can write output without
/// depending on a specific codec library.
pub trait VideoWriter: Send {
    /// Creates or truncates `path` and prepares an encoder for the
    /// geometry in `metadata`.
    fn open(&mut self, path: &Path, metadata: &VideoMetadata) -> Result<(), BoxError>;

    fn write(&mut self, frame: &Frame) -> Result<(), BoxError>;

    /// Size of the output on disk after flushing buffered container data.
    ///
    /// Never decreases while the writer stays open.
    fn bytes_written(&mut self) -> Result<u64, BoxError>;

    /// Flushes the encoder and finalizes the container. Safe to call repeatedly.
    fn close(&mut self) -> Result<(), BoxError>;
}
