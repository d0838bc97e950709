use crate::shared::constants::IMAGE_MIME_TYPE;
use crate::shared::error::BoxError;
use crate::shared::frame::Frame;
use crate::video::domain::image_writer::ImageWriter;

/// Quality used for annotated images; high enough that thin box outlines
/// and label tabs survive compression.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Encodes frames as baseline JPEG using the `image` crate.
pub struct JpegImageWriter {
    quality: u8,
}

impl JpegImageWriter {
    pub fn new() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for JpegImageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageWriter for JpegImageWriter {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, BoxError> {
        let img = image::RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or("Failed to create image from frame data")?;

        let mut bytes = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, self.quality);
        encoder.encode_image(&img)?;
        Ok(bytes)
    }

    fn mime_type(&self) -> &'static str {
        IMAGE_MIME_TYPE
    }
}
