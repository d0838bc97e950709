use std::path::{Path, PathBuf};

use ffmpeg_next::format::Pixel;

use crate::shared::error::BoxError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::{FrameRate, VideoMetadata};
use crate::video::domain::video_writer::VideoWriter;

use super::pixels::fill_rgb_frame;

/// Encodes RGB frames to MPEG-4 Part 2 in an MP4 container via ffmpeg-next.
///
/// The frame rate of the source is kept exactly when the encoder can
/// represent it (see [`FrameRate::encodable`]).
#[derive(Default)]
pub struct FfmpegWriter {
    gop_size: Option<u32>,
    session: Option<EncodeSession>,
}

// Safety: the writer is handed to one worker thread at a time and every
// ffmpeg context it owns is reached only through `&mut self`.
unsafe impl Send for FfmpegWriter {}

/// Everything that exists between `open` and `close`.
struct EncodeSession {
    path: PathBuf,
    muxer: ffmpeg_next::format::context::Output,
    encoder: ffmpeg_next::codec::encoder::video::Encoder,
    to_yuv: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    codec_time_base: ffmpeg_next::Rational,
    stream_time_base: ffmpeg_next::Rational,
    next_pts: i64,
}

impl EncodeSession {
    /// Moves every packet the encoder has ready into the container.
    fn flush_packets(&mut self) -> Result<(), BoxError> {
        let mut packet = ffmpeg_next::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(self.codec_time_base, self.stream_time_base);
            packet.write_interleaved(&mut self.muxer)?;
        }
        Ok(())
    }
}

impl FfmpegWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the keyframe interval. `1` makes every frame intra-coded, so
    /// even identical frames each add bytes to the output.
    pub fn with_gop_size(mut self, gop_size: u32) -> Self {
        self.gop_size = Some(gop_size.max(1));
        self
    }

    fn start(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        rate: FrameRate,
    ) -> Result<EncodeSession, BoxError> {
        let codec_time_base = ffmpeg_next::Rational(rate.den, rate.num);
        let mut muxer = ffmpeg_next::format::output(path)?;
        let needs_global_header = muxer
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4)
            .ok_or("this ffmpeg build has no MPEG-4 encoder")?;
        let mut stream = muxer.add_stream(Some(codec))?;

        let mut settings = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        settings.set_width(width);
        settings.set_height(height);
        settings.set_format(Pixel::YUV420P);
        settings.set_time_base(codec_time_base);
        settings.set_frame_rate(Some(ffmpeg_next::Rational(rate.num, rate.den)));
        if let Some(gop) = self.gop_size {
            settings.set_gop(gop);
        }
        if needs_global_header {
            settings.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = settings.open_with(ffmpeg_next::Dictionary::new())?;
        stream.set_parameters(&encoder);

        muxer.write_header()?;
        let stream_time_base = muxer
            .stream(0)
            .ok_or("muxer lost its video stream")?
            .time_base();

        let to_yuv = ffmpeg_next::software::scaling::Context::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        Ok(EncodeSession {
            path: path.to_path_buf(),
            muxer,
            encoder,
            to_yuv,
            width,
            height,
            codec_time_base,
            stream_time_base,
            next_pts: 0,
        })
    }
}

impl VideoWriter for FfmpegWriter {
    fn open(&mut self, path: &Path, metadata: &VideoMetadata) -> Result<(), BoxError> {
        ffmpeg_next::init()?;
        let (width, height) = (metadata.width, metadata.height);
        if width == 0 || height == 0 {
            return Err(format!("cannot encode {width}x{height} video").into());
        }

        let rate = metadata.frame_rate.encodable();
        self.session = Some(self.start(path, width, height, rate)?);
        log::debug!(
            "Encoding {} as MPEG-4, {width}x{height} at {}/{} fps",
            path.display(),
            rate.num,
            rate.den
        );
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), BoxError> {
        let session = self
            .session
            .as_mut()
            .ok_or("FfmpegWriter: open() was not called")?;
        if frame.width() != session.width || frame.height() != session.height {
            return Err(format!(
                "frame {} is {}x{} but the output is {}x{}",
                frame.index(),
                frame.width(),
                frame.height(),
                session.width,
                session.height
            )
            .into());
        }

        let mut rgb = ffmpeg_next::util::frame::video::Video::new(
            Pixel::RGB24,
            session.width,
            session.height,
        );
        fill_rgb_frame(&mut rgb, frame.data(), session.width, session.height);
        let mut yuv = ffmpeg_next::util::frame::video::Video::empty();
        session.to_yuv.run(&rgb, &mut yuv)?;
        yuv.set_pts(Some(session.next_pts));
        session.next_pts += 1;

        session.encoder.send_frame(&yuv)?;
        session.flush_packets()
    }

    fn bytes_written(&mut self) -> Result<u64, BoxError> {
        let session = self
            .session
            .as_mut()
            .ok_or("FfmpegWriter: open() was not called")?;
        // Safety: the muxer is open and owns a valid AVIOContext until close().
        unsafe {
            let pb = (*session.muxer.as_mut_ptr()).pb;
            if !pb.is_null() {
                ffmpeg_next::ffi::avio_flush(pb);
            }
        }
        Ok(std::fs::metadata(&session.path)?.len())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session.encoder.send_eof()?;
        session.flush_packets()?;
        session.muxer.write_trailer()?;
        log::debug!(
            "Finished {} after {} frames",
            session.path.display(),
            session.next_pts
        );
        Ok(())
    }
}
