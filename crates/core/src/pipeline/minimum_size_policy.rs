use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::shared::constants::{MAX_PADDING_FRAMES, MAX_STALLED_APPENDS};
use crate::shared::error::PipelineError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_backend::VideoBackend;
use crate::video::domain::video_reader::VideoReader;
use crate::video::domain::video_writer::VideoWriter;

/// Result of [`MinimumSizePolicy::ensure_minimum_size`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaddingOutcome {
    /// The file already met the minimum and was not touched.
    Unchanged,
    Padded { blank_frames: usize, final_bytes: u64 },
}

/// Grows an encoded video to a minimum byte size by appending black frames.
///
/// The video is re-encoded into a sibling temporary file with the padding
/// writer, then renamed over the original, so a failed attempt leaves the
/// original untouched.
pub struct MinimumSizePolicy {
    backend: Arc<dyn VideoBackend>,
    max_padding_frames: usize,
    max_stalled_appends: usize,
}

impl MinimumSizePolicy {
    pub fn new(backend: Arc<dyn VideoBackend>) -> Self {
        Self {
            backend,
            max_padding_frames: MAX_PADDING_FRAMES,
            max_stalled_appends: MAX_STALLED_APPENDS,
        }
    }

    pub fn with_limits(mut self, max_padding_frames: usize, max_stalled_appends: usize) -> Self {
        self.max_padding_frames = max_padding_frames;
        self.max_stalled_appends = max_stalled_appends.max(1);
        self
    }

    pub fn ensure_minimum_size(
        &self,
        video_path: &Path,
        metadata: &VideoMetadata,
        min_bytes: u64,
    ) -> Result<PaddingOutcome, PipelineError> {
        let current = file_size(video_path)?;
        if current >= min_bytes {
            return Ok(PaddingOutcome::Unchanged);
        }

        log::debug!(
            "{} is {current} bytes, padding to {min_bytes}",
            video_path.display()
        );

        let dir = parent_dir(video_path);
        let staged = tempfile::Builder::new()
            .prefix(".pad-")
            .suffix(".mp4")
            .tempfile_in(dir)
            .map_err(|e| {
                PipelineError::io(format!("cannot create padding file in {}", dir.display()), e)
            })?
            .into_temp_path();

        let mut reader = self.backend.reader();
        let opened = match reader.open(video_path) {
            Ok(opened) => opened,
            Err(e) => {
                reader.close();
                return Err(PipelineError::invalid_input(video_path, e));
            }
        };
        if (opened.width, opened.height) != (metadata.width, metadata.height) {
            reader.close();
            return Err(PipelineError::Padding {
                path: video_path.to_path_buf(),
                min_bytes,
                reason: format!(
                    "file is {}x{} but padding frames would be {}x{}",
                    opened.width, opened.height, metadata.width, metadata.height
                ),
            });
        }

        let mut writer = self.backend.padding_writer();
        if let Err(e) = writer.open(&staged, metadata) {
            reader.close();
            return Err(PipelineError::encoding(&staged, e));
        }

        let result = self.copy_and_pad(
            &mut *reader,
            &mut *writer,
            video_path,
            &staged,
            metadata,
            min_bytes,
        );
        reader.close();
        let closed = writer.close();
        let blank_frames = result?;
        closed.map_err(|e| PipelineError::encoding(&staged, e))?;

        let final_bytes = file_size(&staged)?;
        if final_bytes < min_bytes {
            return Err(PipelineError::Padding {
                path: video_path.to_path_buf(),
                min_bytes,
                reason: format!("finalized output is only {final_bytes} bytes"),
            });
        }

        staged.persist(video_path).map_err(|e| {
            PipelineError::io(format!("cannot replace {}", video_path.display()), e.error)
        })?;

        log::info!(
            "Padded {} with {blank_frames} blank frames to {final_bytes} bytes",
            video_path.display()
        );
        Ok(PaddingOutcome::Padded {
            blank_frames,
            final_bytes,
        })
    }

    /// Copies every frame of the original, then appends black frames until
    /// the writer reports at least `min_bytes`. Returns the blank frame count.
    fn copy_and_pad(
        &self,
        reader: &mut dyn VideoReader,
        writer: &mut dyn VideoWriter,
        video_path: &Path,
        staged: &Path,
        metadata: &VideoMetadata,
        min_bytes: u64,
    ) -> Result<usize, PipelineError> {
        let mut copied = 0usize;
        for frame in reader.frames() {
            let frame = frame.map_err(|e| PipelineError::invalid_input(video_path, e))?;
            writer
                .write(&frame)
                .map_err(|e| PipelineError::encoding(staged, e))?;
            copied += 1;
        }

        let padding_error = |reason: String| PipelineError::Padding {
            path: video_path.to_path_buf(),
            min_bytes,
            reason,
        };

        let mut blank = Frame::filled(metadata.width, metadata.height, [0, 0, 0], copied);
        let mut size = writer
            .bytes_written()
            .map_err(|e| PipelineError::encoding(staged, e))?;
        let mut blank_frames = 0usize;
        let mut stalled = 0usize;

        while size < min_bytes {
            if blank_frames >= self.max_padding_frames {
                return Err(padding_error(format!(
                    "still {size} bytes after {blank_frames} blank frames"
                )));
            }

            writer
                .write(&blank)
                .map_err(|e| PipelineError::encoding(staged, e))?;
            blank_frames += 1;
            blank = blank.with_index(copied + blank_frames);

            let now = writer
                .bytes_written()
                .map_err(|e| PipelineError::encoding(staged, e))?;
            if now > size {
                stalled = 0;
                size = now;
            } else {
                if now < size {
                    log::warn!(
                        "Writer reported {now} bytes after {blank_frames} blank frames, down from {size}"
                    );
                }
                stalled += 1;
                if stalled >= self.max_stalled_appends {
                    return Err(padding_error(format!(
                        "output stopped growing at {size} bytes after {stalled} appends"
                    )));
                }
            }
        }

        log::debug!("Copied {copied} frames, appended {blank_frames} blank frames");
        Ok(blank_frames)
    }
}

fn file_size(path: &Path) -> Result<u64, PipelineError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| PipelineError::io(format!("cannot stat {}", path.display()), e))
}

/// Directory holding `path`, `.` for bare file names.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}
