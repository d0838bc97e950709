//! Demuxing and RGB24 conversion shared by the ffmpeg readers and writer.

use std::path::Path;

use crate::shared::error::BoxError;
use crate::shared::frame::{Frame, RGB_CHANNELS};

type ScalerKey = (ffmpeg_next::format::Pixel, u32, u32);

/// Converts decoded frames of any pixel format to RGB24.
///
/// The scaling context is created from the first decoded frame rather than
/// from stream parameters, since some decoders only report their output
/// format once a frame has been produced.
pub(crate) struct RgbConverter {
    scaler: Option<(ffmpeg_next::software::scaling::Context, ScalerKey)>,
    output: ffmpeg_next::util::frame::video::Video,
}

impl RgbConverter {
    pub(crate) fn new() -> Self {
        Self {
            scaler: None,
            output: ffmpeg_next::util::frame::video::Video::empty(),
        }
    }

    pub(crate) fn convert(
        &mut self,
        decoded: &ffmpeg_next::util::frame::video::Video,
    ) -> Result<&ffmpeg_next::util::frame::video::Video, BoxError> {
        let key = (decoded.format(), decoded.width(), decoded.height());
        let stale = self.scaler.as_ref().map_or(true, |(_, k)| *k != key);
        if stale {
            let ctx = ffmpeg_next::software::scaling::Context::get(
                key.0,
                key.1,
                key.2,
                ffmpeg_next::format::Pixel::RGB24,
                key.1,
                key.2,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )?;
            self.scaler = Some((ctx, key));
        }

        let (scaler, _) = self.scaler.as_mut().ok_or("RGB scaler unavailable")?;
        scaler.run(decoded, &mut self.output)?;
        Ok(&self.output)
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer.
///
/// ffmpeg frames may have padding bytes at the end of each row (stride > width*3).
/// This function strips that padding to produce a tightly-packed pixel buffer.
pub(crate) fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}

/// Copies a tightly-packed RGB buffer into an ffmpeg frame, respecting stride.
pub(crate) fn fill_rgb_frame(
    rgb_frame: &mut ffmpeg_next::util::frame::video::Video,
    src: &[u8],
    width: u32,
    height: u32,
) {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data_mut(0);
    let row_bytes = width as usize * 3;
    for row in 0..height as usize {
        let src_start = row * row_bytes;
        let dst_start = row * stride;
        data[dst_start..dst_start + row_bytes]
            .copy_from_slice(&src[src_start..src_start + row_bytes]);
    }
}

/// An input container positioned on its best video stream.
pub(crate) struct DemuxedInput {
    pub input: ffmpeg_next::format::context::Input,
    pub stream_index: usize,
    pub rate: ffmpeg_next::Rational,
    pub frame_count: i64,
    pub decoder: RgbDecoder,
}

/// Opens `path` and prepares a decoder for its best video stream.
pub(crate) fn demux(path: &Path) -> Result<DemuxedInput, BoxError> {
    ffmpeg_next::init()?;
    let input = ffmpeg_next::format::input(path)?;

    let (stream_index, rate, frame_count, params) = {
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| format!("{} has no video stream", path.display()))?;
        let mut rate = stream.rate();
        if rate.numerator() <= 0 || rate.denominator() <= 0 {
            rate = stream.avg_frame_rate();
        }
        (stream.index(), rate, stream.frames(), stream.parameters())
    };

    let video = ffmpeg_next::codec::context::Context::from_parameters(params)?
        .decoder()
        .video()?;

    Ok(DemuxedInput {
        input,
        stream_index,
        rate,
        frame_count,
        decoder: RgbDecoder {
            video,
            converter: RgbConverter::new(),
        },
    })
}

/// A video decoder that hands out tightly packed RGB [`Frame`]s.
pub(crate) struct RgbDecoder {
    video: ffmpeg_next::decoder::Video,
    converter: RgbConverter,
}

impl RgbDecoder {
    pub(crate) fn codec_name(&self) -> String {
        self.video
            .codec()
            .map(|c| c.name().to_string())
            .unwrap_or_default()
    }

    pub(crate) fn width(&self) -> u32 {
        self.video.width()
    }

    pub(crate) fn height(&self) -> u32 {
        self.video.height()
    }

    pub(crate) fn send(&mut self, packet: &ffmpeg_next::Packet) -> Result<(), ffmpeg_next::Error> {
        self.video.send_packet(packet)
    }

    /// Signals end of stream; buffered frames stay receivable.
    pub(crate) fn finish(&mut self) {
        let _ = self.video.send_eof();
    }

    /// Pulls the next decoded picture, if the decoder has one ready.
    pub(crate) fn receive(&mut self, index: usize) -> Result<Option<Frame>, BoxError> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.video.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let (width, height) = (decoded.width(), decoded.height());
        let rgb = self.converter.convert(&decoded)?;
        let pixels = extract_rgb_pixels(rgb, width, height);
        Ok(Some(Frame::new(pixels, width, height, RGB_CHANNELS, index)))
    }
}
