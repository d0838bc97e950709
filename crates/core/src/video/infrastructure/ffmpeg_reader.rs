use std::path::Path;

use crate::shared::error::BoxError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::{FrameRate, VideoMetadata};
use crate::video::domain::video_reader::VideoReader;

use super::pixels::{demux, DemuxedInput};

/// Streams RGB frames out of any container libavformat can open.
#[derive(Default)]
pub struct FfmpegReader {
    source: Option<DemuxedInput>,
}

// Safety: the reader is moved between threads but never shared; the ffmpeg
// contexts it owns are only touched through `&mut self`.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoReader for FfmpegReader {
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, BoxError> {
        let source = demux(path)?;

        let metadata = VideoMetadata {
            width: source.decoder.width(),
            height: source.decoder.height(),
            frame_rate: FrameRate::new(source.rate.numerator(), source.rate.denominator()),
            total_frames: source.frame_count.max(0) as usize,
            codec: source.decoder.codec_name(),
            source_path: Some(path.to_path_buf()),
        };
        log::debug!(
            "{}: {}x{} {} at {:.3} fps, {} frames advertised",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.codec,
            metadata.fps(),
            metadata.total_frames
        );

        self.source = Some(source);
        Ok(metadata)
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, BoxError>> + '_> {
        match self.source.as_mut() {
            Some(source) => Box::new(Frames {
                source,
                next_index: 0,
                state: DecodeState::Reading,
            }),
            None => Box::new(std::iter::once(Err("FfmpegReader: open() was not called".into()))),
        }
    }

    fn close(&mut self) {
        self.source = None;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Reading,
    Draining,
    Finished,
}

/// Decodes on demand; only one picture is held in memory at a time.
struct Frames<'a> {
    source: &'a mut DemuxedInput,
    next_index: usize,
    state: DecodeState,
}

impl Frames<'_> {
    fn pull(&mut self) -> Option<Result<Frame, BoxError>> {
        let received = self.source.decoder.receive(self.next_index).transpose()?;
        if received.is_ok() {
            self.next_index += 1;
        }
        Some(received)
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, BoxError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                DecodeState::Finished => return None,
                DecodeState::Draining => {
                    let pulled = self.pull();
                    if pulled.is_none() {
                        self.state = DecodeState::Finished;
                    }
                    return pulled;
                }
                DecodeState::Reading => {
                    if let Some(ready) = self.pull() {
                        return Some(ready);
                    }
                    let wanted = self.source.stream_index;
                    let packet = self
                        .source
                        .input
                        .packets()
                        .find(|(stream, _)| stream.index() == wanted)
                        .map(|(_, packet)| packet);
                    match packet {
                        Some(packet) => {
                            if let Err(e) = self.source.decoder.send(&packet) {
                                self.state = DecodeState::Finished;
                                return Some(Err(format!(
                                    "corrupt packet after frame {}: {e}",
                                    self.next_index
                                )
                                .into()));
                            }
                        }
                        None => {
                            self.source.decoder.finish();
                            self.state = DecodeState::Draining;
                        }
                    }
                }
            }
        }
    }
}
