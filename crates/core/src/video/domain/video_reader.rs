use std::path::Path;

use crate::shared::error::BoxError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// Reads frames from a video or image source.
///
/// Implementations handle I/O details (codec, container format, etc.)
/// while the pipeline works with the abstract `Frame` and `VideoMetadata`
/// types.
pub trait VideoReader: Send {
    /// Opens a video or image file and returns its metadata.
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, BoxError>;

    /// Returns a lazy iterator over frames in decode order.
    ///
    /// The sequence is finite and cannot be restarted; exhaustion is the
    /// normal end of stream.
    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, BoxError>> + '_>;

    /// Releases any resources held by the reader. Safe to call repeatedly.
    fn close(&mut self);
}
