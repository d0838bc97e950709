use std::path::Path;

use crate::shared::error::BoxError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::{FrameRate, VideoMetadata};
use crate::video::domain::video_reader::VideoReader;

use super::pixels::{demux, DemuxedInput};

/// Presents a still image (JPEG, PNG, BMP, ...) as a one-frame stream.
///
/// The picture is decoded eagerly in `open`, so a corrupt file is rejected
/// before any annotation work starts. The reported frame rate is `0/1`.
#[derive(Default)]
pub struct ImageFileReader {
    opened: bool,
    picture: Option<Frame>,
}

impl ImageFileReader {
    pub fn new() -> Self {
        Self::default()
    }
}

fn decode_first_picture(source: &mut DemuxedInput) -> Result<Frame, BoxError> {
    let wanted = source.stream_index;
    while let Some((_, packet)) = source
        .input
        .packets()
        .find(|(stream, _)| stream.index() == wanted)
    {
        source.decoder.send(&packet)?;
        if let Some(picture) = source.decoder.receive(0)? {
            return Ok(picture);
        }
    }

    // Some image demuxers hold the only picture until end of stream.
    source.decoder.finish();
    source
        .decoder
        .receive(0)?
        .ok_or_else(|| "image decoder produced no picture".into())
}

impl VideoReader for ImageFileReader {
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, BoxError> {
        let mut source = demux(path)?;
        let codec = source.decoder.codec_name();
        let picture = decode_first_picture(&mut source)?;
        if picture.width() == 0 || picture.height() == 0 {
            return Err(format!("{} decoded to an empty picture", path.display()).into());
        }

        let metadata = VideoMetadata {
            width: picture.width(),
            height: picture.height(),
            frame_rate: FrameRate::new(0, 1),
            total_frames: 1,
            codec,
            source_path: Some(path.to_path_buf()),
        };
        self.picture = Some(picture);
        self.opened = true;
        Ok(metadata)
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, BoxError>> + '_> {
        if !self.opened {
            return Box::new(std::iter::once(Err(
                "ImageFileReader: open() was not called".into()
            )));
        }
        Box::new(self.picture.take().into_iter().map(Ok))
    }

    fn close(&mut self) {
        self.picture = None;
        self.opened = false;
    }
}
