use crate::shared::error::BoxError;
use crate::shared::frame::Frame;

/// Marks detected defects on a frame.
///
/// Takes the frame by value so implementations can draw in place. The
/// returned frame has the same width, height, channel layout and index as
/// the input. Shared by concurrent pipelines, hence `Sync` and `&self`.
pub trait FrameAnnotator: Send + Sync {
    fn annotate(&self, frame: Frame) -> Result<Frame, BoxError>;
}
