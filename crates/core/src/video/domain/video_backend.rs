use super::video_reader::VideoReader;
use super::video_writer::VideoWriter;

/// Hands out fresh readers and writers for one pipeline run.
///
/// Transcoding and padding each need their own handles, so the pipeline
/// depends on a factory rather than on single instances.
pub trait VideoBackend: Send + Sync {
    fn reader(&self) -> Box<dyn VideoReader>;

    /// Writer for the annotated output.
    fn writer(&self) -> Box<dyn VideoWriter>;

    /// Writer used to re-encode a video while appending padding frames.
    ///
    /// Every encoded frame must add bytes to the output so that padding
    /// makes progress. Defaults to [`VideoBackend::writer`].
    fn padding_writer(&self) -> Box<dyn VideoWriter> {
        self.writer()
    }
}
