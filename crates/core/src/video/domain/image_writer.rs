use crate::shared::error::BoxError;
use crate::shared::frame::Frame;

/// Encodes a single frame as an image.
pub trait ImageWriter: Send {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, BoxError>;

    /// MIME type of the bytes produced by [`ImageWriter::encode`].
    fn mime_type(&self) -> &'static str;
}
