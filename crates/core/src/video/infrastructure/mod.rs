pub mod ffmpeg_backend;
pub mod ffmpeg_reader;
pub mod ffmpeg_writer;
pub mod image_file_reader;
pub mod jpeg_image_writer;
mod pixels;
#[cfg(test)]
pub(crate) mod test_video;
