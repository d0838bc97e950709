//! Synthesizes small MPEG-4 clips for ffmpeg-backed tests.

use std::path::{Path, PathBuf};

use crate::shared::frame::Frame;
use crate::shared::video_metadata::{FrameRate, VideoMetadata};
use crate::video::domain::video_writer::VideoWriter;

use super::ffmpeg_writer::FfmpegWriter;

pub(crate) fn test_video_path(dir: &Path) -> PathBuf {
    dir.join("test.mp4")
}

/// Encodes `num_frames` flat grey frames, each 40 levels brighter than the
/// one before (wrapping at 256), through the production writer.
pub(crate) fn create_test_video(path: &Path, num_frames: usize, width: u32, height: u32, fps: i32) {
    let metadata = VideoMetadata {
        width,
        height,
        frame_rate: FrameRate::new(fps, 1),
        total_frames: num_frames,
        codec: String::new(),
        source_path: None,
    };

    let mut writer = FfmpegWriter::new();
    writer.open(path, &metadata).unwrap();
    for index in 0..num_frames {
        let level = (index * 40 % 256) as u8;
        writer
            .write(&Frame::filled(width, height, [level; 3], index))
            .unwrap();
    }
    writer.close().unwrap();
}
